use crate::binxml::tokens::BinXmlToken;
use crate::err::DecodeWarning;

use log::{trace, warn};

/// Side channel for tracing a decode.
///
/// An observer is passed into every decode call; nothing is configured globally.
pub trait DecodeObserver {
    /// Called for every token read, before it is dispatched.
    fn token(&mut self, _offset: u64, _token: &BinXmlToken<'_>) {}

    /// Called for every non-fatal condition, in the order they are recorded.
    fn warning(&mut self, _warning: &DecodeWarning) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DecodeObserver for NoopObserver {}

/// Forwards tokens to `trace!` and warnings to `warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl DecodeObserver for LogObserver {
    fn token(&mut self, offset: u64, token: &BinXmlToken<'_>) {
        trace!("Offset `0x{:08x} ({})`: {:?}", offset, offset, token);
    }

    fn warning(&mut self, warning: &DecodeWarning) {
        warn!("{:?}", warning);
    }
}

impl<T: DecodeObserver + ?Sized> DecodeObserver for &mut T {
    fn token(&mut self, offset: u64, token: &BinXmlToken<'_>) {
        (**self).token(offset, token)
    }

    fn warning(&mut self, warning: &DecodeWarning) {
        (**self).warning(warning)
    }
}
