use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

struct BrowserProfile {
    user_agent: &'static str,
    platform: &'static str,
    sec_ch_ua: Option<&'static str>,
}

const PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        platform: "\"Windows\"",
        sec_ch_ua: Some("\"Google Chrome\";v=\"125\", \"Chromium\";v=\"125\", \"Not.A/Brand\";v=\"24\""),
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        platform: "\"macOS\"",
        sec_ch_ua: Some("\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\""),
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        platform: "\"Linux\"",
        sec_ch_ua: Some("\"Google Chrome\";v=\"123\", \"Not:A-Brand\";v=\"8\", \"Chromium\";v=\"123\""),
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
        platform: "\"Windows\"",
        sec_ch_ua: None,
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
        platform: "\"macOS\"",
        sec_ch_ua: None,
    },
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7",
    "en-GB,en;q=0.9,uk;q=0.8",
    "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7",
];

/// A plausible, randomized browser header set for the primary tier.
pub fn random_browser_headers<R: Rng + ?Sized>(rng: &mut R) -> HeaderMap {
    let profile = PROFILES.choose(rng).unwrap_or(&PROFILES[0]);
    let language = ACCEPT_LANGUAGES.choose(rng).copied().unwrap_or(ACCEPT_LANGUAGES[0]);

    let mut headers = HeaderMap::new();
    insert(&mut headers, "user-agent", profile.user_agent);
    insert(&mut headers, "accept", "application/json, text/javascript, */*; q=0.01");
    insert(&mut headers, "accept-language", language);
    insert(&mut headers, "cache-control", "no-cache");
    insert(&mut headers, "pragma", "no-cache");
    if rng.random_bool(0.5) {
        insert(&mut headers, "dnt", "1");
    }
    if let Some(sec_ch_ua) = profile.sec_ch_ua {
        insert(&mut headers, "sec-ch-ua", sec_ch_ua);
        insert(&mut headers, "sec-ch-ua-mobile", "?0");
        insert(&mut headers, "sec-ch-ua-platform", profile.platform);
    }
    headers
}

/// Headers the site's own front-end sends for an XHR status lookup.
pub fn in_app_fetch_headers(origin: &str) -> Vec<(&'static str, String)> {
    let referer = if origin.ends_with('/') {
        origin.to_string()
    } else {
        format!("{}/", origin)
    };
    vec![
        ("Accept", "application/json, text/javascript, */*; q=0.01".to_string()),
        ("Accept-Language", "en-US,en;q=0.9".to_string()),
        ("Cache-Control", "no-cache".to_string()),
        ("Pragma", "no-cache".to_string()),
        ("Referer", referer),
        ("Sec-Fetch-Dest", "empty".to_string()),
        ("Sec-Fetch-Mode", "cors".to_string()),
        ("Sec-Fetch-Site", "same-origin".to_string()),
    ]
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
