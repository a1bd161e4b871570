//! Output and diagnostic capture shared by both facades.

use crate::envelope::Diagnostic;

use super::OutputSink;

/// Printed text plus the non-fatal diagnostics of one facade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacadeState {
    output: String,
    // Once `println` has been used, `print` stops appending newlines.
    use_print_line: bool,
    diagnostics: Vec<Diagnostic>,
    diagnostic_bytes: usize,
}

fn diagnostic_bytes(d: &Diagnostic) -> usize {
    std::mem::size_of::<Diagnostic>() + d.msg.len() + d.stack_trace.as_ref().map_or(0, String::len)
}

impl FacadeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostic_bytes = 0;
        std::mem::take(&mut self.diagnostics)
    }

    /// Bytes of printed text and diagnostics currently held.
    pub fn footprint(&self) -> usize {
        self.output.len() + self.diagnostic_bytes
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// Attach `stack` to every diagnostic still lacking one.
    pub fn attach_stack(&mut self, stack: &str) {
        for d in self.diagnostics.iter_mut().rev() {
            if d.stack_trace.is_some() {
                break;
            }
            d.stack_trace = Some(stack.to_string());
            self.diagnostic_bytes += stack.len();
        }
    }

    pub fn extend_diagnostics(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostic_bytes += diagnostics.iter().map(diagnostic_bytes).sum::<usize>();
        self.diagnostics.extend(diagnostics);
    }

    pub fn push_output(&mut self, text: &str) {
        self.output.push_str(text);
    }
}

impl OutputSink for FacadeState {
    fn print(&mut self, parts: &[String]) {
        self.output.push_str(&parts.join(" "));
        if !self.use_print_line {
            self.output.push('\n');
        }
    }

    fn println(&mut self, parts: &[String]) {
        self.use_print_line = true;
        self.print(parts);
        self.output.push('\n');
    }

    fn output(&self) -> &str {
        &self.output
    }

    fn clear_output(&mut self) {
        self.output.clear();
    }

    fn report_error(&mut self, msg: String) {
        let diagnostic = Diagnostic::new(msg);
        self.diagnostic_bytes += diagnostic_bytes(&diagnostic);
        self.diagnostics.push(diagnostic);
    }

    fn errors(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
