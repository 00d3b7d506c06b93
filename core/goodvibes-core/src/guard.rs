//! Destructive git command guard.
//!
//! Evaluated on `PreToolUse` for shell commands, before the host spawns
//! anything. Pure: no process calls and no state mutation.
//!
//! | Command                              | On main | Elsewhere |
//! |--------------------------------------|---------|-----------|
//! | `git push --force` (or `+refspec`)   | Deny    | Warn      |
//! | `git reset --hard`                   | Deny    | Warn      |
//! | `git rebase`                         | Warn    | Allow     |
//!
//! For pushes "on main" means the push targets the main branch, either
//! through an explicit refspec or implicitly through the current branch.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Warn(String),
    Deny(String),
}

impl GuardVerdict {
    fn severity(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Warn(_) => 1,
            Self::Deny(_) => 2,
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Warn(reason) | Self::Deny(reason) => Some(reason),
        }
    }

    /// Keeps the more severe verdict; the earlier one wins ties.
    fn max(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Checks every segment of a (possibly compound) shell command.
pub fn evaluate_command(command: &str, current_branch: &str, main_branch: &str) -> GuardVerdict {
    split_segments(command)
        .iter()
        .map(|segment| evaluate_segment(segment, current_branch, main_branch))
        .fold(GuardVerdict::Allow, GuardVerdict::max)
}

fn evaluate_segment(segment: &str, current_branch: &str, main_branch: &str) -> GuardVerdict {
    let tokens = tokenize(segment);
    let Some((subcommand, args)) = git_subcommand(&tokens) else {
        return GuardVerdict::Allow;
    };
    let on_main = current_branch == main_branch;

    match subcommand {
        "push" => evaluate_push(args, current_branch, main_branch),
        "reset" if args.iter().any(|a| a == "--hard") => {
            if on_main {
                GuardVerdict::Deny(format!(
                    "git reset --hard on {main_branch} discards committed work; use a feature branch"
                ))
            } else {
                GuardVerdict::Warn(format!(
                    "git reset --hard on {current_branch} discards uncommitted changes"
                ))
            }
        }
        "rebase" => {
            let positional = positional_args(args);
            let rewrites_main = positional.get(1).is_some_and(|b| *b == main_branch);
            if on_main || rewrites_main {
                GuardVerdict::Warn(format!("git rebase rewrites history on {main_branch}"))
            } else {
                GuardVerdict::Allow
            }
        }
        _ => GuardVerdict::Allow,
    }
}

fn evaluate_push(args: &[String], current_branch: &str, main_branch: &str) -> GuardVerdict {
    let positional = positional_args(args);
    let refspecs = positional.get(1..).unwrap_or_default();

    let flag_force = args.iter().any(|a| is_force_flag(a));
    let refspec_force = refspecs.iter().any(|r| r.starts_with('+'));
    if !flag_force && !refspec_force {
        return GuardVerdict::Allow;
    }

    let targets: Vec<String> = if refspecs.is_empty() {
        vec![current_branch.to_string()]
    } else {
        refspecs
            .iter()
            .map(|refspec| push_target(refspec, current_branch))
            .collect()
    };

    if targets.iter().any(|t| t == main_branch) {
        GuardVerdict::Deny(format!(
            "Force push to {main_branch} rewrites shared history"
        ))
    } else {
        GuardVerdict::Warn(format!("Force push to {}", targets.join(", ")))
    }
}

fn is_force_flag(arg: &str) -> bool {
    if arg == "--force" || arg == "--force-with-lease" || arg.starts_with("--force-with-lease=") {
        return true;
    }
    // Short flag clusters such as `-f` or `-uf`.
    arg.len() > 1
        && arg.starts_with('-')
        && !arg.starts_with("--")
        && arg[1..].chars().all(|c| c.is_ascii_alphabetic())
        && arg.contains('f')
}

/// Destination branch of a push refspec.
fn push_target(refspec: &str, current_branch: &str) -> String {
    let refspec = refspec.trim_start_matches('+');
    let dst = refspec.rsplit_once(':').map_or(refspec, |(_, dst)| dst);
    let dst = dst.trim_start_matches("refs/heads/");
    if dst == "HEAD" || dst.is_empty() {
        current_branch.to_string()
    } else {
        dst.to_string()
    }
}

fn positional_args(args: &[String]) -> Vec<&str> {
    args.iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with('-') || a.starts_with('+'))
        .collect()
}

/// Finds `git <subcommand>` in a token list, skipping global options.
fn git_subcommand(tokens: &[String]) -> Option<(&str, &[String])> {
    let git_at = tokens
        .iter()
        .position(|t| t == "git" || t.ends_with("/git"))?;
    let mut idx = git_at + 1;
    while let Some(token) = tokens.get(idx) {
        match token.as_str() {
            "-C" | "-c" | "--git-dir" | "--work-tree" => idx += 2,
            t if t.starts_with('-') => idx += 1,
            t => return Some((t, &tokens[idx + 1..])),
        }
    }
    None
}

/// Splits on `&&`, `||`, `;` and `|` outside quotes.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ';' | '\n') => segments.push(std::mem::take(&mut current)),
            (None, '&') if chars.peek() == Some(&'&') => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            }
            (None, '|') => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            (None, c) => current.push(c),
        }
    }
    segments.push(current);
    segments.retain(|s| !s.trim().is_empty());
    segments
}

fn tokenize(segment: &str) -> Vec<String> {
    segment
        .split_whitespace()
        .map(|t| t.trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_main(command: &str) -> GuardVerdict {
        evaluate_command(command, "main", "main")
    }

    fn on_feature(command: &str) -> GuardVerdict {
        evaluate_command(command, "feature/x", "main")
    }

    #[test]
    fn test_plain_commands_are_allowed() {
        assert_eq!(on_main("ls -la"), GuardVerdict::Allow);
        assert_eq!(on_main("git status"), GuardVerdict::Allow);
        assert_eq!(on_main("git push origin main"), GuardVerdict::Allow);
        assert_eq!(on_main("git reset --soft HEAD~1"), GuardVerdict::Allow);
    }

    #[test]
    fn test_force_push_to_main_is_denied() {
        assert!(on_main("git push --force").is_deny());
        assert!(on_main("git push -f origin").is_deny());
        assert!(on_feature("git push --force-with-lease origin main").is_deny());
        assert!(on_feature("git push origin +main").is_deny());
        assert!(on_feature("git push origin +HEAD:refs/heads/main").is_deny());
        assert!(on_feature("git push -uf origin main").is_deny());
    }

    #[test]
    fn test_force_push_elsewhere_warns() {
        assert!(matches!(on_feature("git push --force"), GuardVerdict::Warn(_)));
        assert!(matches!(on_main("git push -f origin feature/x"), GuardVerdict::Warn(_)));
    }

    #[test]
    fn test_follow_tags_is_not_force() {
        assert_eq!(on_main("git push --follow-tags origin main"), GuardVerdict::Allow);
    }

    #[test]
    fn test_reset_hard() {
        assert!(on_main("git reset --hard HEAD~3").is_deny());
        assert!(matches!(on_feature("git reset --hard"), GuardVerdict::Warn(_)));
    }

    #[test]
    fn test_rebase() {
        assert!(matches!(on_main("git rebase origin/main"), GuardVerdict::Warn(_)));
        assert!(matches!(on_feature("git rebase feature/x main"), GuardVerdict::Warn(_)));
        assert_eq!(on_feature("git rebase main"), GuardVerdict::Allow);
    }

    #[test]
    fn test_compound_command_most_severe_wins() {
        let verdict = on_main("git rebase origin/main && git push --force");
        assert!(verdict.is_deny());

        let verdict = on_main("echo ok; git reset --hard || true");
        assert!(verdict.is_deny());

        let verdict = on_feature("git log | head -5");
        assert_eq!(verdict, GuardVerdict::Allow);
    }

    #[test]
    fn test_separators_inside_quotes_do_not_split() {
        let verdict = on_main(r#"git commit -m "a; git reset --hard""#);
        assert_eq!(verdict, GuardVerdict::Allow);
    }

    #[test]
    fn test_global_options_are_skipped() {
        assert!(on_main("git -C /repo push --force").is_deny());
        assert!(on_main("/usr/bin/git --no-pager reset --hard").is_deny());
    }

    #[test]
    fn test_respects_configured_main_branch() {
        assert!(evaluate_command("git push -f", "master", "master").is_deny());
        assert!(!evaluate_command("git push -f", "main", "master").is_deny());
    }

    #[test]
    fn test_reason_is_exposed() {
        let verdict = on_main("git push --force");
        assert!(verdict.reason().unwrap().contains("main"));
        assert_eq!(GuardVerdict::Allow.reason(), None);
    }
}
