//! Opening URLs in the user's browser.

use anyhow::Result;
use tracing::warn;

pub trait Browser {
    /// Open `url`. Implementations fall back to printing the URL rather than
    /// failing.
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs with the platform browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        if let Err(err) = webbrowser::open(url) {
            warn!(error = %err, "could not launch a browser");
            println!("Open this URL in your browser: {url}");
        }
        Ok(())
    }
}
