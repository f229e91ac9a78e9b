use chrono::{DateTime, Utc};

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    // Reproducible builds pin the date through SOURCE_DATE_EPOCH.
    let built_at = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    println!(
        "cargo:rustc-env=G2BURN_BUILD_DATE={}",
        built_at.format("%Y-%m-%d")
    );
}
