/// Identifier of the running platform as it appears on the left-hand side of
/// a runtime manifest line, e.g. `linux-x64=https://...`.
#[must_use]
pub fn platform_id() -> &'static str {
    if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
        "macos-arm64"
    } else if cfg!(target_os = "macos") && cfg!(target_arch = "x86_64") {
        "macos-x64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
        "linux-x64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "aarch64") {
        "linux-arm64"
    } else if cfg!(target_os = "windows") && cfg!(target_arch = "x86_64") {
        "windows-x64"
    } else if cfg!(target_os = "windows") && cfg!(target_arch = "aarch64") {
        "windows-arm64"
    } else {
        "unknown"
    }
}
