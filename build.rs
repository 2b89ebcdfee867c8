fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through REVIEWBOT_GIT_HASH from the deployment build environment
    println!("cargo:rerun-if-env-changed=REVIEWBOT_GIT_HASH");
    if let Ok(hash) = std::env::var("REVIEWBOT_GIT_HASH") {
        println!("cargo:rustc-env=REVIEWBOT_GIT_HASH={}", hash);
    }
}
