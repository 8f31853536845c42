//! Assistant detection: a cheap substring heuristic over recent PTY output,
//! plus a small capability table keyed by the resulting tag. Not a subtype
//! hierarchy — per-assistant behaviour (status colour, display name) lives
//! in this table, keeping the session code itself agnostic to which CLI it
//! is running.

use std::sync::OnceLock;

/// How many trailing bytes of output the heuristic inspects on each read.
const DETECTION_WINDOW: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssistantProfile {
    pub tag: &'static str,
    pub display_name: &'static str,
    pub status_color: &'static str,
}

const PROFILES: &[(&[&str], AssistantProfile)] = &[
    (
        &["Claude Code", "claude-code", "? for shortcuts"],
        AssistantProfile { tag: "claude", display_name: "Claude Code", status_color: "#d97757" },
    ),
    (
        &["Gemini CLI", "gemini-cli"],
        AssistantProfile { tag: "gemini", display_name: "Gemini CLI", status_color: "#4285f4" },
    ),
    (
        &["OpenAI Codex", "codex-cli"],
        AssistantProfile { tag: "codex", display_name: "Codex", status_color: "#10a37f" },
    ),
];

fn default_profile() -> &'static AssistantProfile {
    static DEFAULT: OnceLock<AssistantProfile> = OnceLock::new();
    DEFAULT.get_or_init(|| AssistantProfile {
        tag: "unknown",
        display_name: "Terminal",
        status_color: "#888888",
    })
}

/// Look up the capability-table entry for a detected tag, falling back to a
/// generic "unknown terminal" profile so callers never need an Option.
pub fn profile_for(tag: &str) -> AssistantProfile {
    PROFILES
        .iter()
        .map(|(_, profile)| *profile)
        .find(|p| p.tag == tag)
        .unwrap_or(*default_profile())
}

/// Cheap substring match over a window of recent output. Returns the detected
/// tag if any known marker is found; callers keep the previous tag otherwise
/// so a single blank read doesn't flip the label back to "unknown".
pub fn detect(recent_output: &[u8]) -> Option<&'static str> {
    let window_start = recent_output.len().saturating_sub(DETECTION_WINDOW);
    let window = &recent_output[window_start..];
    let text = String::from_utf8_lossy(window);
    for (markers, profile) in PROFILES {
        if markers.iter().any(|m| text.contains(m)) {
            return Some(profile.tag);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_claude_from_shortcuts_hint() {
        let out = b"Welcome\n? for shortcuts\n";
        assert_eq!(detect(out), Some("claude"));
    }

    #[test]
    fn no_markers_returns_none() {
        assert_eq!(detect(b"$ ls\nfoo bar\n"), None);
    }

    #[test]
    fn unknown_tag_falls_back_to_default_profile() {
        let p = profile_for("nonexistent");
        assert_eq!(p.tag, "unknown");
    }

    #[test]
    fn known_tag_resolves_profile() {
        let p = profile_for("gemini");
        assert_eq!(p.display_name, "Gemini CLI");
    }
}
