use std::env;
use std::fs;
use std::path::PathBuf;

const MODULE_FILES: [&str; 2] = ["ScriptUi.module.json", "ScriptUi.js"];

fn main() {
    slint_build::compile("ui/app.slint").expect("failed to compile app.slint");
    println!("cargo:rerun-if-changed=ui/app.slint");

    // The host loads its command module from the executable's directory.
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let Some(profile_dir) = out_dir.ancestors().nth(3) else {
        panic!("unexpected OUT_DIR layout: {}", out_dir.display());
    };

    for file in MODULE_FILES {
        let source = PathBuf::from("modules").join(file);
        println!("cargo:rerun-if-changed={}", source.display());
        fs::copy(&source, profile_dir.join(file))
            .unwrap_or_else(|err| panic!("failed to copy {}: {err}", source.display()));
    }
}
