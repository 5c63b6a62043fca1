//! Merging responder outputs into one response

use crate::responders::ResponderOutput;
use crate::state::Workflow;

/// Merge successful outputs.
///
/// A single-responder workflow returns that responder's text verbatim.
/// Otherwise every output is placed under a `### <name>` header, in the
/// order given, separated by blank lines.
///
/// Parallel outputs arrive in completion order, so the section order of a
/// parallel merge can differ between runs of the same plan.
pub fn merge_outputs(workflow: Workflow, outputs: &[ResponderOutput]) -> String {
    match (workflow, outputs) {
        (_, []) => String::new(),
        (Workflow::Single, [only]) => only.text.clone(),
        _ => outputs
            .iter()
            .map(|o| format!("### {}\n{}", o.name, o.text))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_output_is_verbatim() {
        let outputs = vec![ResponderOutput::new("research", "facts")];
        assert_eq!(merge_outputs(Workflow::Single, &outputs), "facts");
    }

    #[test]
    fn test_parallel_outputs_keep_given_order() {
        let outputs = vec![
            ResponderOutput::new("translation", "text"),
            ResponderOutput::new("research", "facts"),
        ];
        assert_eq!(
            merge_outputs(Workflow::Parallel, &outputs),
            "### translation\ntext\n\n### research\nfacts"
        );
    }

    #[test]
    fn test_multiple_outputs_get_headers_in_order() {
        let outputs = vec![
            ResponderOutput::new("research", "facts"),
            ResponderOutput::new("document_writing", "report"),
        ];
        assert_eq!(
            merge_outputs(Workflow::Sequential, &outputs),
            "### research\nfacts\n\n### document_writing\nreport"
        );
    }

    #[test]
    fn test_no_outputs_is_empty() {
        assert!(merge_outputs(Workflow::Parallel, &[]).is_empty());
    }
}
