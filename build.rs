/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=resource/config.yaml");

    // OUT_DIR is `target/<profile>/build/<pkg>-<hash>/out`
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let Some(profile_dir) = Path::new(&out_dir).ancestors().nth(3) else {
        return;
    };

    let src = Path::new("resource/config.yaml");
    if src.exists() {
        fs::copy(src, profile_dir.join("config.yaml")).expect("Failed to copy config.yaml");
    }
}
