//! Desktop shell: builds and runs the Tauri application.

use std::sync::Arc;
use anyhow::Context;
use tauri::{Emitter, Manager};
use tracing::{debug, info, warn};
use crate::commands::{
    add_dropped_images, add_image_paths, merge_images, remove_image, save_result, start_new_batch,
    thumbnail_preview, thumbnails, ui_state,
};
use crate::config::HdrConfig;
use crate::core::AppState;
use crate::telemetry::ChannelTelemetry;

// Import the window-vibrancy crate only on macOS
#[cfg(target_os = "macos")]
use window_vibrancy::{apply_vibrancy, NSVisualEffectMaterial};

const CONFIG_FILE: &str = "hdr-merge.json";
const TELEMETRY_BUFFER: usize = 64;

pub fn run() -> anyhow::Result<()> {
    let app = tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            add_image_paths,
            add_dropped_images,
            remove_image,
            thumbnails,
            thumbnail_preview,
            merge_images,
            start_new_batch,
            ui_state,
            save_result,
        ])
        .setup(|app| {
            let config_path = app.path().app_config_dir()?.join(CONFIG_FILE);
            let config = HdrConfig::load(&config_path)?;
            debug!("Loaded configuration from {}", config_path.display());

            let resource_dir = app.path().resource_dir().ok();
            let (telemetry, mut records) = ChannelTelemetry::new(TELEMETRY_BUFFER);
            let state = AppState::new(config, resource_dir.as_deref(), Arc::new(telemetry));
            let orchestrator = Arc::clone(state.orchestrator());
            app.manage(state);
            debug!("✓ AppState initialized");

            // UI state → frontend
            let handle = app.app_handle().clone();
            let mut ui = orchestrator.subscribe();
            tauri::async_runtime::spawn(async move {
                while ui.changed().await.is_ok() {
                    let snapshot = ui.borrow_and_update().clone();
                    if let Err(e) = handle.emit("hdr-ui-state", snapshot) {
                        debug!("UI state event dropped: {}", e);
                    }
                }
            });

            // Telemetry → frontend reporter
            let handle = app.app_handle().clone();
            tauri::async_runtime::spawn(async move {
                while let Some(record) = records.recv().await {
                    let label = record.label;
                    if let Err(e) = handle.emit("hdr-telemetry", record) {
                        debug!("Telemetry event {} dropped: {}", label, e);
                    }
                }
            });

            // Engine state moves on its own during init; re-derive the UI on each change
            let mut engine = orchestrator.engine().subscribe();
            let publisher = Arc::clone(&orchestrator);
            tauri::async_runtime::spawn(async move {
                while engine.changed().await.is_ok() {
                    publisher.publish().await;
                }
            });

            #[cfg(target_os = "macos")]
            {
                let window = app
                    .get_webview_window("main")
                    .context("main window missing")?;
                info!("Applying vibrancy effect for macOS");
                // Note: This requires macOSPrivateApi=true in tauri.conf.json
                if let Err(e) = apply_vibrancy(&window, NSVisualEffectMaterial::HudWindow, None, None) {
                    warn!("Failed to apply vibrancy effect: {}", e);
                }
            }

            // Start warmup in a separate task so it doesn't block app startup
            let app_handle = app.app_handle().clone();
            tauri::async_runtime::spawn(async move {
                let state = app_handle.state::<AppState>();
                state.orchestrator().page_view();
                match state.warmup_engine().await {
                    Ok(()) => debug!("Engine warmup finished in the background"),
                    Err(e) => warn!("Engine warmup failed: {}", e),
                }
            });

            Ok(())
        })
        .build(tauri::generate_context!())
        .context("error while building tauri application")?;

    info!("Starting application event loop...");
    app.run(|_app_handle, event| {
        if let tauri::RunEvent::Exit = event {
            info!("Application exiting");
        }
    });
    Ok(())
}
