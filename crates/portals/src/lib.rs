//! Site drivers for the registry portals.
//!
//! A [`driver::SiteDriver`] turns one claimed job into a sequence of
//! [`driver::ItemOutcome`]s. Portal navigation sits behind per-portal traits
//! ([`ri_digital::RiDigitalPortal`], [`onr_sigri::OnrSigriPortal`]) so the
//! item loop can be exercised without a browser; the production
//! implementations drive Chrome over the W3C WebDriver protocol
//! ([`webdriver`]).

pub mod driver;
pub mod launcher;
pub mod onr_sigri;
pub mod ri_digital;
pub mod webdriver;
