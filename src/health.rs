//! Site availability probing.

use tracing::{debug, warn};

use crate::browser::Browser;
use crate::types::{SiteSource, SiteStatus};

/// Probe a site's domain with a plain GET. Exactly HTTP 200 counts as
/// healthy; anything else, including transport failures, marks the site
/// unavailable. Disabled sites are never probed.
pub fn check_site(browser: &Browser, site: &SiteSource) -> SiteStatus {
    if site.status == SiteStatus::Disabled {
        return SiteStatus::Disabled;
    }
    match browser.get(&site.domain) {
        Ok(resp) if resp.status == 200 => {
            debug!(site = %site.id, "site healthy");
            SiteStatus::Normal
        }
        Ok(resp) => {
            warn!(site = %site.id, status = resp.status, "site check failed");
            SiteStatus::Unavailable
        }
        Err(err) => {
            warn!(site = %site.id, %err, "site unreachable");
            SiteStatus::Unavailable
        }
    }
}
