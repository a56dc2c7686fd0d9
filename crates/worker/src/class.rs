/// Execution classes used for task scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Long-lived channel I/O: the fleet subscription and its reconnect loop.
	Realtime,
	/// Periodic device sampling that can be stopped without affecting reads.
	Sampling,
	/// Auxiliary work such as fan-out helpers and test doubles.
	Background,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Realtime => "realtime",
			Self::Sampling => "sampling",
			Self::Background => "background",
		}
	}
}
