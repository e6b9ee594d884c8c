// UI layer: everything that talks to the operator's terminal.
// - `Chooser` lets scope resolution ask "which client/network?" without
//   knowing whether a human is there to answer.
// - `upload_progress` builds the per-run progress bar and `print_report`
//   tells the operator what happened to each file.

use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Result, UploadError};
use crate::upload::RunReport;

/// One selectable entry (a client or a network).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: u64,
    pub name: String,
}

/// Picks one candidate when the platform offers several.
pub trait Chooser {
    /// `kind` names what is being chosen ("client", "network") for messages.
    fn choose_among(&self, kind: &str, candidates: &[Candidate]) -> Result<u64>;
}

/// Prompts on the terminal. Candidates are listed sorted by name and the
/// operator types an ID; anything that is not one of the listed IDs is
/// rejected and the prompt is shown again.
#[derive(Debug, Default)]
pub struct InteractiveChooser;

impl Chooser for InteractiveChooser {
    fn choose_among(&self, kind: &str, candidates: &[Candidate]) -> Result<u64> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        println!();
        println!("Available {}s for this API key:", kind);
        for candidate in &sorted {
            println!("  {:>8}  {}", candidate.id, candidate.name);
        }
        println!();

        let answer: String = Input::new()
            .with_prompt(format!("Enter the ID of the {} to upload to", kind))
            .validate_with(|input: &String| -> std::result::Result<(), String> {
                match parse_choice(input, &sorted) {
                    Some(_) => Ok(()),
                    None => Err(format!("'{}' is not one of the listed {} IDs", input.trim(), kind)),
                }
            })
            .interact_text()
            .map_err(|e| UploadError::Configuration(format!("could not read {} choice: {}", kind, e)))?;

        parse_choice(&answer, &sorted)
            .ok_or_else(|| UploadError::Configuration(format!("invalid {} choice '{}'", kind, answer)))
    }
}

/// For unattended runs: ambiguity is a configuration problem.
#[derive(Debug, Default)]
pub struct NonInteractiveChooser;

impl Chooser for NonInteractiveChooser {
    fn choose_among(&self, kind: &str, candidates: &[Candidate]) -> Result<u64> {
        let listed = candidates
            .iter()
            .map(|c| format!("{} ({})", c.id, c.name))
            .collect::<Vec<_>>()
            .join(", ");
        Err(UploadError::Configuration(format!(
            "several {kind}s are available and no {kind}_id is configured; pick one of: {listed}"
        )))
    }
}

/// Parse an operator answer into one of the candidate IDs.
pub fn parse_choice(input: &str, candidates: &[Candidate]) -> Option<u64> {
    let id: u64 = input.trim().parse().ok()?;
    candidates.iter().any(|c| c.id == id).then_some(id)
}

/// Progress bar over the files of a run.
pub fn upload_progress(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// End-of-run summary. Every file that did not make it into the archive is
/// named together with the reason.
pub fn print_report(report: &RunReport) {
    println!();
    if report.tasks.is_empty() {
        println!("No files found to process.");
        return;
    }
    if let Some(assessment) = report.assessment_id {
        println!("Assessment ID: {}", assessment);
    }
    println!("Archived: {} of {} file(s)", report.archived.len(), report.tasks.len());

    for failure in &report.failed {
        println!("  FAILED    {}: {}", failure.path.display(), failure.reason);
    }
    for failure in &report.archive_failures {
        println!(
            "  INGESTED  {} (not archived, do not upload again): {}",
            failure.path.display(),
            failure.reason
        );
    }
    for failure in &report.urba_failures {
        println!("  URBA      {}: {}", failure.path.display(), failure.reason);
    }
    if !report.failed.is_empty() {
        println!("Failed files were left in place and will be retried on the next run.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate { id: 12, name: "Beta".into() },
            Candidate { id: 7, name: "Alpha".into() },
        ]
    }

    #[test]
    fn choice_must_be_a_listed_id() {
        let list = candidates();
        assert_eq!(parse_choice(" 7 ", &list), Some(7));
        assert_eq!(parse_choice("8", &list), None);
        assert_eq!(parse_choice("Alpha", &list), None);
        assert_eq!(parse_choice("", &list), None);
    }

    #[test]
    fn non_interactive_refuses_to_guess() {
        let err = NonInteractiveChooser.choose_among("client", &candidates()).unwrap_err();
        assert!(matches!(err, UploadError::Configuration(ref m) if m.contains("12 (Beta)")));
    }
}
