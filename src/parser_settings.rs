use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;

use std::fmt;

/// Default cap on element nesting and on nested template/fragment frames.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 256;

/// Without an explicit limit, a decode may expand this many template and fragment body bytes per
/// byte of input.
pub const DEFAULT_TEMPLATE_EXPANSION_FACTOR: usize = 16;

/// Inputs smaller than this are budgeted as if they had this length.
pub const MIN_TEMPLATE_EXPANSION_BASE: usize = 4096;

#[derive(Clone)]
pub struct ParserSettings {
    /// Controls the number of threads used for decoding chunks.
    /// `0` means "use all available cores", `1` decodes on the calling thread.
    num_threads: usize,
    /// Reject token tags with reserved or inapplicable flag bits.
    strict_tokens: bool,
    /// Maximum depth of open elements (and of nested template/fragment frames).
    max_nesting_depth: usize,
    /// Total template and fragment body bytes one decode may expand. `None` scales the limit
    /// with the input length.
    max_template_expansion: Option<usize>,
    /// Codec used to decode `AnsiStringType` values.
    ansi_codec: EncodingRef,
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("strict_tokens", &self.strict_tokens)
            .field("max_nesting_depth", &self.max_nesting_depth)
            .field("max_template_expansion", &self.max_template_expansion)
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &ParserSettings) -> bool {
        self.ansi_codec.name() == other.ansi_codec.name()
            && self.num_threads == other.num_threads
            && self.strict_tokens == other.strict_tokens
            && self.max_nesting_depth == other.max_nesting_depth
            && self.max_template_expansion == other.max_template_expansion
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            strict_tokens: true,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_template_expansion: None,
            ansi_codec: WINDOWS_1252,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// Sets the number of worker threads.
    /// `0` will let rayon decide, `1` disables multithreading.
    ///
    /// Without the `multithreading` feature this setting has no effect.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            1
        };

        self
    }

    /// When enabled (the default), a token tag with bit 7 set, or with bit 6 set on a token that
    /// does not define it, fails with `UnknownToken`. When disabled such bits are ignored and
    /// reported as a warning.
    pub fn strict_tokens(mut self, strict_tokens: bool) -> Self {
        self.strict_tokens = strict_tokens;

        self
    }

    /// Sets the maximum nesting depth. Values below 1 are clamped to 1.
    ///
    /// The limit is inclusive: exactly `max_nesting_depth` elements may be open at once, and the
    /// open that would make it `max_nesting_depth + 1` fails `NestingTooDeep`. A stream that opens
    /// exactly `max_nesting_depth` elements and then ends fails `PrematureEndOfStream`.
    /// The same limit applies to the number of nested template and fragment frames.
    pub fn max_nesting_depth(mut self, max_nesting_depth: usize) -> Self {
        self.max_nesting_depth = max_nesting_depth.max(1);

        self
    }

    /// Caps the total number of template and embedded fragment body bytes a single decode may
    /// expand. Every template instance and every `BinXmlType` substitution is charged the length
    /// of the body it expands; going over fails `TemplateExpansionLimit` at that token.
    ///
    /// By default the limit is `DEFAULT_TEMPLATE_EXPANSION_FACTOR` times the length of the chunk
    /// (or of the payload when no chunk is given), but at least
    /// `DEFAULT_TEMPLATE_EXPANSION_FACTOR * MIN_TEMPLATE_EXPANSION_BASE`.
    pub fn max_template_expansion(mut self, max_template_expansion: usize) -> Self {
        self.max_template_expansion = Some(max_template_expansion);

        self
    }

    /// Sets the codec used to decode ANSI strings.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;

        self
    }

    pub fn get_num_threads(&self) -> &usize {
        &self.num_threads
    }

    pub fn is_strict_tokens(&self) -> bool {
        self.strict_tokens
    }

    pub fn get_max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    /// The expansion limit for a decode over `input_len` bytes.
    pub fn get_max_template_expansion(&self, input_len: usize) -> usize {
        self.max_template_expansion.unwrap_or_else(|| {
            input_len
                .max(MIN_TEMPLATE_EXPANSION_BASE)
                .saturating_mul(DEFAULT_TEMPLATE_EXPANSION_FACTOR)
        })
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }
}
