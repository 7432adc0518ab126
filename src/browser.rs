//! Opening the dashboard in the desktop's default browser.

use std::process::Command;

use anyhow::Context;

/// The platform's "open this URL" command and its arguments.
pub fn launcher(url: &str) -> (&'static str, Vec<String>) {
    if cfg!(target_os = "windows") {
        // `start` treats the first quoted argument as a window title
        ("cmd", vec!["/C".into(), "start".into(), "\"\"".into(), url.into()])
    } else if cfg!(target_os = "macos") {
        ("open", vec![url.into()])
    } else {
        ("xdg-open", vec![url.into()])
    }
}

/// Ask the desktop to open `url`. Does not wait for the browser.
pub fn open(url: &str) -> anyhow::Result<()> {
    let (program, args) = launcher(url);
    Command::new(program)
        .args(&args)
        .spawn()
        .with_context(|| format!("Failed to run {program}"))?;
    Ok(())
}

#[test]
fn test_launcher_passes_url_last() {
    let (program, args) = launcher("http://127.0.0.1:5000");
    assert!(!program.is_empty());
    assert_eq!(args.last().map(String::as_str), Some("http://127.0.0.1:5000"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_launcher_linux() {
    assert_eq!(
        launcher("http://127.0.0.1:5000"),
        ("xdg-open", vec!["http://127.0.0.1:5000".to_string()])
    );
}
