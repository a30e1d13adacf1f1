use convonest_core::notice::{Notice, NoticeLevel, NoticeSink};

/// Prints gateway notices to stderr.
pub struct StderrNotices;

impl NoticeSink for StderrNotices {
    fn notify(&self, notice: &Notice) {
        tracing::debug!(title = %notice.title, "Notice raised");
        match notice.level {
            NoticeLevel::Blocking => eprintln!("!! {}: {}", notice.title, notice.text),
            NoticeLevel::Transient => eprintln!("{}: {}", notice.title, notice.text),
        }
    }
}
