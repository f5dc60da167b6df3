fn main() {
    // The engine host script is embedded with `include_str!`.
    println!("cargo:rerun-if-changed=resources/engine_host.py");
    println!("cargo:rerun-if-changed=resources/hdr_processor.py");

    // Tauri build will embed Windows resources (icons) if RC.EXE is available.
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
