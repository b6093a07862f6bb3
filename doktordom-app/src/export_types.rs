use std::borrow::Cow;

use anyhow::Context;
use doktordom_app_lib::mk_specta;
use specta_typescript::Typescript;

/// Where the UI expects its bindings when no path is given
const DEFAULT_BINDINGS_PATH: &str = "ui/bindings.ts";

const LINT_HEADER: &str = "/* eslint @typescript-eslint/no-unused-vars: 0 */\n/* eslint @typescript-eslint/no-explicit-any: 0 */";

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BINDINGS_PATH.to_string());

    let mut lang = Typescript::new();
    lang.header = Cow::Borrowed(LINT_HEADER);
    mk_specta()
        .export(lang, &path)
        .with_context(|| format!("Failed to export location bindings to {path}"))?;

    println!("Exported location commands, events, and types to {path}");
    Ok(())
}
