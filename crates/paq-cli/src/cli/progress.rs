//! Terminal progress reporting for `paq fetch`.

use paq_core::item::FetchItem;
use paq_core::scheduler::{AcquireProgress, ProgressStats};

/// Prints item events and a periodic one-line status to stderr.
#[derive(Debug, Default)]
pub struct TextProgress;

impl AcquireProgress for TextProgress {
    fn fetch(&mut self, item: &FetchItem) {
        if item.total_size > 0 {
            eprintln!("Get: {} [{} B]", item.uri, item.total_size);
        } else {
            eprintln!("Get: {}", item.uri);
        }
    }

    fn done(&mut self, item: &FetchItem) {
        eprintln!("Done: {} [{} B]", item.uri, item.bytes_fetched);
    }

    fn ims_hit(&mut self, item: &FetchItem) {
        eprintln!("Hit: {} (up to date)", item.uri);
    }

    fn fail(&mut self, item: &FetchItem, reason: &str) {
        eprintln!("Fail: {} ({reason})", item.uri);
    }

    fn media_change(&mut self, media: &str, drive: &str) -> bool {
        // no interactive prompt in the plain CLI; decline and let the
        // affected requests fail with a clear reason
        eprintln!("Media change required: insert '{media}' into '{drive}' (unsupported, failing)");
        false
    }

    fn pulse(&mut self, stats: &ProgressStats) -> bool {
        if stats.item_count > 0 {
            eprint!(
                "\r{}/{} files, {:.0}% ",
                stats.items_done,
                stats.item_count,
                stats.fraction() * 100.0
            );
        }
        true
    }

    fn stop(&mut self) {
        eprintln!();
    }
}
