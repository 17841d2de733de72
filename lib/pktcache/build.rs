fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo::rustc-check-cfg=cfg(usdt_stable_asm)");
    println!("cargo::rustc-check-cfg=cfg(usdt_stable_asm_sym)");

    // The usdt probes in the cache need inline asm, which was
    // stabilized in 1.59 (and `asm_sym` on macOS in 1.66).
    let min = |v: &str| version_check::is_min_version(v).unwrap_or(false);

    if min("1.59") {
        println!("cargo:rustc-cfg=usdt_stable_asm");
    }

    #[cfg(target_os = "macos")]
    if min("1.66") {
        println!("cargo:rustc-cfg=usdt_stable_asm_sym");
    }
}
