use keyferry::config::Config;
use keyferry::server::ServerState;
use std::sync::Arc;

/// set proc title
fn set_proc_title(title: &str) {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;

        unsafe {
            let title = CString::new(title).unwrap();
            libc::prctl(libc::PR_SET_NAME, title.as_ptr() as libc::c_ulong, 0, 0, 0);
        }
    }
}

/// set locale
fn set_locale() {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CString;

        unsafe {
            let locale = CString::new("C").unwrap();
            libc::setlocale(libc::LC_COLLATE, locale.as_ptr());
        }
    }
}

async fn amain() {
    let cwd = std::env::current_dir().unwrap();
    log::info!("cwd: {:?}", cwd);

    let config = Arc::new(Config::from_toml("./keyferry.toml").unwrap_or_else(|_| Config::new()));
    let server = ServerState::new(config);
    if let Err(e) = server.start().await {
        log::error!("server exited: {:?}", e);
    }
}

fn main() {
    env_logger::init();

    set_proc_title("keyferry");
    set_locale();

    // The keyspace core is single-threaded-cooperative by design (see
    // database.rs): a current-thread executor is what makes the `std::sync`
    // mutex around each database correct without ever blocking it.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(amain());
}
