//! Desktop host binding: wires the `shodh-rag` core into a Tauri app.
//! Packaging, installers, auto-update, and UI layout are out of scope
//! (spec.md Non-goals) — this crate's only job is exposing chat/index/
//! profile/session as Tauri commands over managed state.

mod commands;

use commands::AppState;
use shodh_rag::RagConfig;
use tauri::Manager;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_fs::init())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .setup(|app| {
            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("failed to resolve app data directory");
            std::fs::create_dir_all(&app_data_dir).expect("failed to create app data directory");

            let mut config = RagConfig::default();
            config.data_dir = app_data_dir.clone();
            config.embedding.model_dir = app_data_dir.join("models");

            let profiles_root = commands::default_profiles_root(&app_data_dir);
            let profiles = shodh_rag::ProfileManager::new(profiles_root)
                .expect("failed to initialize profile manager");

            app.manage(AppState::new(config, profiles));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::chat,
            commands::index_active_profile,
            commands::index_stats,
            commands::list_profiles,
            commands::create_profile,
            commands::activate_profile,
            commands::delete_profile,
            commands::list_sessions,
            commands::delete_session,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
