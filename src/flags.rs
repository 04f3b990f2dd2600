//! Country flag emoji for fighter nationality.

use tracing::debug;

/// Alpha-2 code → alpha-3 codes and names seen in citizenship fields.
const COUNTRY_ALIASES: &[(&str, &[&str])] = &[
    // North America
    ("US", &["usa", "united states", "united states of america"]),
    ("CA", &["can", "canada"]),
    ("MX", &["mex", "mexico"]),
    ("CU", &["cub", "cuba"]),
    ("JM", &["jam", "jamaica"]),
    // Europe
    ("GB", &["gbr", "uk", "united kingdom", "great britain"]),
    ("IE", &["irl", "ireland"]),
    ("FR", &["fra", "france"]),
    ("DE", &["deu", "ger", "germany"]),
    ("IT", &["ita", "italy"]),
    ("ES", &["esp", "spain"]),
    ("NL", &["nld", "ned", "netherlands"]),
    ("SE", &["swe", "sweden"]),
    ("NO", &["nor", "norway"]),
    ("FI", &["fin", "finland"]),
    ("IS", &["isl", "iceland"]),
    ("PL", &["pol", "poland"]),
    ("RU", &["rus", "russia"]),
    ("UA", &["ukr", "ukraine"]),
    ("LT", &["ltu", "lithuania"]),
    ("LV", &["lva", "latvia"]),
    ("EE", &["est", "estonia"]),
    ("CZ", &["cze", "czech republic", "czechia"]),
    ("SK", &["svk", "slovakia"]),
    ("HR", &["hrv", "cro", "croatia"]),
    ("RS", &["srb", "serbia"]),
    ("BA", &["bih", "bosnia", "bosnia and herzegovina"]),
    ("MK", &["mkd", "north macedonia"]),
    // Caucasus & Central Asia
    ("GE", &["geo", "georgia"]),
    ("AM", &["arm", "armenia"]),
    ("AZ", &["aze", "azerbaijan"]),
    ("KZ", &["kaz", "kazakhstan"]),
    ("UZ", &["uzb", "uzbekistan"]),
    ("KG", &["kgz", "kyrgyzstan"]),
    ("TJ", &["tjk", "tajikistan"]),
    // South America
    ("BR", &["bra", "brazil"]),
    ("AR", &["arg", "argentina"]),
    ("CL", &["chl", "chile"]),
    ("CO", &["col", "colombia"]),
    ("PE", &["per", "peru"]),
    ("VE", &["ven", "venezuela"]),
    // Asia & Oceania
    ("AU", &["aus", "australia"]),
    ("NZ", &["nzl", "new zealand"]),
    ("JP", &["jpn", "japan"]),
    ("KR", &["kor", "south korea", "korea"]),
    ("CN", &["chn", "china"]),
    ("TH", &["tha", "thailand"]),
    ("PH", &["phl", "philippines"]),
    ("IN", &["ind", "india"]),
    ("ID", &["idn", "indonesia"]),
    ("MY", &["mys", "malaysia"]),
    ("SG", &["sgp", "singapore"]),
    // Africa & Middle East
    ("ZA", &["rsa", "zaf", "south africa"]),
    ("NG", &["nga", "nigeria"]),
    ("CM", &["cmr", "cameroon"]),
    ("EG", &["egy", "egypt"]),
    ("IL", &["isr", "israel"]),
    ("IR", &["irn", "iran"]),
    ("IQ", &["irq", "iraq"]),
    ("AE", &["are", "uae", "united arab emirates"]),
];

/// Home nations use subdivision tag sequences rather than regional indicators.
const SUBDIVISION_FLAGS: &[(&str, &str)] = &[
    ("england", "\u{1F3F4}\u{E0067}\u{E0062}\u{E0065}\u{E006E}\u{E0067}\u{E007F}"),
    ("scotland", "\u{1F3F4}\u{E0067}\u{E0062}\u{E0073}\u{E0063}\u{E0074}\u{E007F}"),
    ("wales", "\u{1F3F4}\u{E0067}\u{E0062}\u{E0077}\u{E006C}\u{E0073}\u{E007F}"),
];

/// Flag emoji for an alpha-2 code, alpha-3 code or country name.
pub fn country_flag(key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let lower = key.to_lowercase();

    if let Some((_, flag)) = SUBDIVISION_FLAGS.iter().find(|(name, _)| *name == lower) {
        return Some((*flag).to_string());
    }

    let code = COUNTRY_ALIASES
        .iter()
        .find(|(_, aliases)| aliases.contains(&lower.as_str()))
        .map(|(code, _)| (*code).to_string())
        .or_else(|| {
            (key.len() == 2 && key.chars().all(|c| c.is_ascii_alphabetic()))
                .then(|| key.to_ascii_uppercase())
        });

    let flag = code.as_deref().and_then(regional_indicators);
    debug!("Flag for {key}: {flag:?}");
    flag
}

/// Flag emoji from a flag image URL such as `.../countries/500/bra.png`.
pub fn flag_from_url(href: &str) -> Option<String> {
    let file = href.split(['?', '#']).next()?.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    if !(2..=3).contains(&stem.len()) || !stem.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    country_flag(stem)
}

fn regional_indicators(code: &str) -> Option<String> {
    code.chars()
        .map(|c| char::from_u32(0x1F1E6 + (c as u32).checked_sub('A' as u32)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha2_codes_map_directly() {
        assert_eq!(country_flag("US").as_deref(), Some("🇺🇸"));
        assert_eq!(country_flag("br").as_deref(), Some("🇧🇷"));
    }

    #[test]
    fn alpha3_codes_and_names() {
        assert_eq!(country_flag("IRL").as_deref(), Some("🇮🇪"));
        assert_eq!(country_flag("Brazil").as_deref(), Some("🇧🇷"));
        assert_eq!(country_flag("United States").as_deref(), Some("🇺🇸"));
        assert_eq!(country_flag("  new zealand ").as_deref(), Some("🇳🇿"));
    }

    #[test]
    fn home_nations_use_subdivision_flags() {
        assert_eq!(country_flag("England").as_deref(), Some(SUBDIVISION_FLAGS[0].1));
        assert_eq!(country_flag("UK").as_deref(), Some("🇬🇧"));
    }

    #[test]
    fn unknown_countries_have_no_flag() {
        assert!(country_flag("Dagestan").is_none());
        assert!(country_flag("").is_none());
    }

    #[test]
    fn flags_from_image_urls() {
        assert_eq!(
            flag_from_url("https://a.espncdn.com/i/teamlogos/countries/500/bra.png").as_deref(),
            Some("🇧🇷")
        );
        assert_eq!(flag_from_url("https://x.test/flags/IE.png?w=40").as_deref(), Some("🇮🇪"));
        assert!(flag_from_url("https://x.test/flags/unknown.png").is_none());
    }
}
