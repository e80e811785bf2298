use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;
use std::sync::Once;

/// Where a panic was raised, captured while the panicking frames still exist.
#[derive(Debug)]
pub(crate) struct PanicSite {
    pub location: Option<String>,
    pub backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Chain a panic hook that records the site of every panic on the panicking
/// thread. The previously installed hook still runs afterwards.
pub(crate) fn install() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let site = PanicSite {
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                backtrace: Backtrace::force_capture(),
            };
            // The slot may be unavailable while the thread is being torn down.
            let _ = LAST_PANIC.try_with(|last| {
                if let Ok(mut last) = last.try_borrow_mut() {
                    *last = Some(site);
                }
            });
            previous(info);
        }));
    });
}

/// Take the site recorded for the most recent panic on this thread.
///
/// `catch_unwind` runs on the thread that panicked, so calling this right
/// after recovering returns that panic's site.
pub(crate) fn take() -> Option<PanicSite> {
    LAST_PANIC
        .try_with(|last| last.try_borrow_mut().ok().and_then(|mut last| last.take()))
        .ok()
        .flatten()
}
