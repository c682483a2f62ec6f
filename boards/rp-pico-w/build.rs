//! Puts `memory.x` on the linker search path and fetches the CYW43 firmware blobs the
//! binaries embed.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const FIRMWARE_DIR: &str = "cyw43-firmware";
const FIRMWARE_URL: &str = "https://github.com/embassy-rs/embassy/raw/refs/heads/main/cyw43-firmware";
const FIRMWARE_FILES: [&str; 4] = [
    "43439A0.bin",
    "43439A0_btfw.bin",
    "43439A0_clm.bin",
    "LICENSE-permissive-binary-license-1.0.txt",
];

fn main() {
    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::write(out.join("memory.x"), include_bytes!("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");

    if env::var_os("CARGO_FEATURE_SKIP_CYW43_FIRMWARE").is_none() {
        fetch_firmware();
    }

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}

fn fetch_firmware() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", FIRMWARE_DIR);
    fs::create_dir_all(FIRMWARE_DIR).expect("Failed to create firmware directory");

    for file in FIRMWARE_FILES {
        let path = Path::new(FIRMWARE_DIR).join(file);
        if path.exists() {
            continue;
        }
        let url = format!("{}/{}", FIRMWARE_URL, file);
        let response = match reqwest::blocking::get(&url) {
            Ok(response) => response,
            Err(err) => panic!("Failed to download {}: {}, required for the Pico W radio", url, err),
        };
        let content = response.bytes().expect("Failed to read firmware");
        fs::write(path, &content).expect("Failed to write firmware");
    }
}
