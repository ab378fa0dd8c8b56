//! Cookie seeding for the cookie-primed tier.
//!
//! Cookies exported from a browser (Netscape format) can be loaded into the
//! batch cookie jar before a run. They are only sent by cookie-primed requests.

mod cookies;

pub use cookies::{CookieError, CookieSeed, SeedCookie, seed_jar_from_file};
