//! Browser identities used by HTTP sessions.
//!
//! The origin sits behind anti-bot filtering that rejects tool-looking clients,
//! so sessions present a desktop browser User-Agent. A refreshed session picks a
//! different identity when more than one is available.

use rand::seq::SliceRandom;

/// Desktop Chrome/Firefox identities on Windows and macOS.
pub(crate) const BROWSER_USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Picks a browser User-Agent, avoiding `previous` when possible.
#[must_use]
pub(crate) fn pick_browser_user_agent(previous: Option<&str>) -> &'static str {
    let mut rng = rand::thread_rng();
    let candidates: Vec<&'static str> = BROWSER_USER_AGENTS
        .into_iter()
        .filter(|ua| Some(*ua) != previous)
        .collect();
    candidates
        .choose(&mut rng)
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}
