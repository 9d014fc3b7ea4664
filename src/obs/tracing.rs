// self
use crate::{_prelude::*, obs::CycleKind};

/// Instrumented future returned by [`CycleSpan::instrument`].
pub type InstrumentedCycle<F> = tracing::instrument::Instrumented<F>;

/// A span builder used by rotator cycles.
#[derive(Clone, Debug)]
pub struct CycleSpan {
	span: tracing::Span,
}
impl CycleSpan {
	/// Creates a new span tagged with the provided cycle kind + stage.
	pub fn new(kind: CycleKind, stage: &'static str) -> Self {
		let span = tracing::info_span!("quota_rotator.cycle", cycle = kind.as_str(), stage);

		Self { span }
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> CycleSpanGuard {
		CycleSpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCycle<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// RAII guard returned by [`CycleSpan::entered`].
pub struct CycleSpanGuard {
	_guard: tracing::span::EnteredSpan,
}
impl Debug for CycleSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CycleSpanGuard(..)")
	}
}
