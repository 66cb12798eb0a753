use tracing::Span;
use uuid::Uuid;

/// Logging scope of one pipeline run, retriever or chat session.
///
/// Components enter `span` while working, so their events carry the run id
/// instead of relying on process-wide state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub span: Span,
}

impl RunContext {
    pub fn new(component: &'static str) -> Self {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", component, run_id = %run_id);
        Self { run_id, span }
    }

    pub fn detached() -> Self {
        Self {
            run_id: Uuid::nil(),
            span: Span::none(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::detached()
    }
}
