//! Human-readable progress from raw build output

use std::sync::LazyLock;

use regex::Regex;

/// BuildKit step line, e.g. `#8 [deps 3/3] RUN npm ci`
static BUILDKIT_STEP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^#\d+\s+\[(\w+)\s+\d+/\d+\]\s+(.+)").ok());

const DEFAULT_STEP: &str = "Building...";

fn first_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn buildkit_step(stage: &str, cmd: &str) -> String {
    if let Some(run) = cmd.strip_prefix("RUN") {
        let run = run.trim_start();
        if run.contains("npm ci") || run.contains("npm install") {
            return "Installing dependencies...".to_string();
        }
        if run.contains("npm run build") {
            return "Building application...".to_string();
        }
        return format!("Running: {}", first_chars(run, 60));
    }
    if cmd.starts_with("COPY") {
        return format!("Copying files ({})...", stage);
    }
    format!("{}: {}", stage, first_chars(cmd, 60))
}

/// Describe the latest recognisable step in `output`, scanning from the end
pub fn parse_build_step(output: &str) -> String {
    for line in output.lines().rev() {
        let line = line.trim();

        if let Some(caps) = BUILDKIT_STEP.as_ref().and_then(|re| re.captures(line)) {
            return buildkit_step(&caps[1], &caps[2]);
        }

        if line.contains("Creating release") {
            return "Creating release...".to_string();
        }
        if line.contains("Pushing image") {
            return "Pushing image...".to_string();
        }
        if line.contains("Building image") {
            return "Building image...".to_string();
        }
        if line.contains("Waiting for") {
            return line.to_string();
        }

        // Sandbox build script banners
        if line.starts_with("==> Installing dependencies") {
            return "Installing dependencies...".to_string();
        }
        if line.starts_with("==> Building application") {
            return "Building application...".to_string();
        }
    }
    DEFAULT_STEP.to_string()
}
