//! Page-1 markers for bot challenges and signed-in sessions.

/// Markers of a bot-challenge or "unusual traffic" interstitial.
const CHALLENGE_MARKERS: &[&str] = &[
    "/sorry/index",
    "g-recaptcha",
    "id=\"captcha-form\"",
    "unusual traffic",
    "our systems have detected",
    "tráfego incomum",
    "nossos sistemas detectaram",
    "não sou um robô",
];

/// Markers that the engine is serving a signed-in account.
const AUTH_MARKERS: &[&str] = &[
    "accounts.google.com/signoutoptions",
    "aria-label=\"google account",
    "aria-label=\"conta do google",
    "sair da conta",
];

fn contains_any(html: &str, markers: &[&str]) -> bool {
    let lowered = html.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

pub fn is_challenge(html: &str) -> bool {
    contains_any(html, CHALLENGE_MARKERS)
}

pub fn is_authenticated(html: &str) -> bool {
    contains_any(html, AUTH_MARKERS)
}
