//! Process signals and fault handling.

use std::panic::{self, PanicHookInfo};
use std::time::Duration;

use pipeline_core::panic_is_contained;
use tokio::signal;

use crate::AdmissionController;

/// Wait for ctrl-c or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received ctrl-c"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(message) = info.payload().downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Install a panic hook tied to `controller`.
///
/// A panic on the main thread runs the cleanup callbacks and exits the
/// process after `grace`. A panic inside a job handler is only logged, the
/// worker turns it into a failed job. A panic anywhere else (a runtime
/// worker or a spawned task) triggers a memory reclaim pass and the task's
/// owner sees the failure through its join handle. The previous hook still
/// runs.
pub fn install_panic_hook(controller: AdmissionController, grace: Duration) {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let message = panic_message(info);
        let thread = std::thread::current();

        if panic_is_contained() {
            tracing::error!(%location, "Job handler panicked: {}", message);
            original_hook(info);
            return;
        }

        let on_main = thread.name() == Some("main");

        if on_main {
            tracing::error!(%location, "Fatal panic: {}", message);
            original_hook(info);

            let controller = controller.clone();
            let cleanup = std::thread::spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        runtime.block_on(async move {
                            controller.run_cleanup().await;
                            tokio::time::sleep(grace).await;
                        });
                    }
                    Err(e) => tracing::error!("Could not run cleanup after panic: {}", e),
                }
            });
            let _ = cleanup.join();
            std::process::exit(1);
        }

        tracing::error!(
            %location,
            thread = thread.name().unwrap_or("unnamed"),
            "Unhandled panic in background task: {}",
            message
        );
        original_hook(info);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let controller = controller.clone();
            handle.spawn(async move {
                controller.force_reclaim().await;
            });
        }
    }));
}
