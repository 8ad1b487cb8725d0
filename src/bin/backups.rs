//! Main entry point for backups

#![deny(warnings, missing_docs, trivial_casts, unused_qualifications)]
#![allow(unsafe_code)]

use duplicity_backups::application::BACKUPS_APP;

/// Boot backups
fn main() {
    // restore the default SIGPIPE behavior so that piping the output into e.g. `head` works
    #[cfg(not(windows))]
    #[allow(unsafe_code)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    abscissa_core::boot(&BACKUPS_APP);
}
