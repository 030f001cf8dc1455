// ABOUTME: Runs the scanner over protocol/*.xml at compile time, writing generated modules to OUT_DIR
// ABOUTME: Shares scanner.rs with the library crate via include!, so there is exactly one implementation

use std::env;
use std::fs;
use std::path::Path;

include!("src/scanner.rs");

fn main() {
    let protocol_dir = Path::new("protocol");
    println!("cargo::rerun-if-changed=protocol");

    let out_dir = env::var("OUT_DIR").expect("cargo sets OUT_DIR for build scripts");

    let mut entries: Vec<_> = fs::read_dir(protocol_dir)
        .unwrap_or_else(|e| panic!("reading {}: {e}", protocol_dir.display()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "xml"))
        .collect();
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        println!("cargo::rerun-if-changed={}", path.display());

        let xml = fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
        let code = generate(&xml).unwrap_or_else(|e| panic!("generating code from {}: {e}", path.display()));

        let stem = path
            .file_stem()
            .expect("xml file has a stem")
            .to_string_lossy();
        let out_path = Path::new(&out_dir).join(format!("{stem}.rs"));
        fs::write(&out_path, code).unwrap_or_else(|e| panic!("writing {}: {e}", out_path.display()));
    }
}
