use crate::ChunkOffset;
use crate::binxml::tokens::{
    BinXmlRawToken, BinXmlTemplateRef, BinXmlToken, TEMPLATE_DEFINITION_HEADER_SIZE, TemplateValue,
    TemplateSubstitutionDescriptor, TokenContext, read_template_definition, read_token,
};
use crate::binxml::value_variant::BinXmlValue;
use crate::binxml::visitor::BinXmlVisitor;
use crate::err::{DecodeWarning, DeserializationError, DeserializationResult as Result};
use crate::model::Document;
use crate::observer::{DecodeObserver, NoopObserver};
use crate::tree_builder::DocumentBuilder;
use crate::utils::ByteCursor;
use crate::ParserSettings;

use ahash::AHashMap;
use log::{debug, trace};

/// Supplies template bodies that are not stored inline in the record.
pub trait TemplateResolver: Send + Sync {
    /// Returns the binary XML body (without the definition header) of `template_id`.
    fn resolve_template(&self, template_id: u32) -> Option<&[u8]>;
}

/// A map-backed [`TemplateResolver`].
#[derive(Debug, Default, Clone)]
pub struct TemplateTable {
    templates: AHashMap<u32, Vec<u8>>,
}

impl TemplateTable {
    pub fn new() -> Self {
        TemplateTable::default()
    }

    /// Registers the body of `template_id`, returning the previous body if there was one.
    pub fn insert(&mut self, template_id: u32, body: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.templates.insert(template_id, body.into())
    }

    pub fn contains(&self, template_id: u32) -> bool {
        self.templates.contains_key(&template_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateResolver for TemplateTable {
    fn resolve_template(&self, template_id: u32) -> Option<&[u8]> {
        self.templates.get(&template_id).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSource {
    Payload,
    Template { template_id: u32 },
    /// A `BinXmlType` substitution value: the frame index holding the array and the value index.
    Fragment { array_frame: usize, index: usize },
}

/// One byte stream being decoded.
#[derive(Debug)]
struct Frame<'a> {
    cursor: ByteCursor<'a>,
    source: FrameSource,
    substitutions: Option<Vec<TemplateValue<'a>>>,
}

impl<'a> Frame<'a> {
    fn template_id(&self) -> Option<u32> {
        match self.source {
            FrameSource::Template { template_id } => Some(template_id),
            _ => None,
        }
    }
}

/// Body bytes expanded so far by one decode, against its limit.
#[derive(Debug)]
struct ExpansionBudget {
    used: usize,
    limit: usize,
}

impl ExpansionBudget {
    fn charge(&mut self, offset: u64, len: usize) -> Result<()> {
        match self.used.checked_add(len) {
            Some(used) if used <= self.limit => {
                self.used = used;
                Ok(())
            }
            _ => Err(DeserializationError::TemplateExpansionLimit {
                offset,
                limit: self.limit,
            }),
        }
    }
}

/// Decodes binary XML into a stream of visitor events.
///
/// Template bodies and embedded fragments are decoded with an explicit frame stack, so the
/// native call stack stays flat regardless of the input.
#[derive(Clone)]
pub struct BinXmlDecoder<'a> {
    settings: ParserSettings,
    chunk: Option<&'a [u8]>,
    base_offset: u64,
    templates: Option<&'a dyn TemplateResolver>,
}

impl Default for BinXmlDecoder<'_> {
    fn default() -> Self {
        BinXmlDecoder {
            settings: ParserSettings::default(),
            chunk: None,
            base_offset: 0,
            templates: None,
        }
    }
}

impl<'a> BinXmlDecoder<'a> {
    pub fn new() -> Self {
        BinXmlDecoder::default()
    }

    pub fn settings(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The chunk the payload lives in, used for out-of-line names and template definitions.
    pub fn chunk(mut self, chunk: &'a [u8]) -> Self {
        self.chunk = Some(chunk);
        self
    }

    /// Absolute offset of the payload's first byte. Inline names and definitions are detected by
    /// comparing references against absolute offsets, so this must match the payload's location
    /// in the chunk.
    pub fn base_offset(mut self, base_offset: u64) -> Self {
        self.base_offset = base_offset;
        self
    }

    pub fn templates(mut self, templates: &'a dyn TemplateResolver) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Decodes `payload` into a [`Document`].
    pub fn decode(
        &self,
        payload: &'a [u8],
        observer: &mut impl DecodeObserver,
    ) -> Result<Document> {
        let mut builder = DocumentBuilder::new();
        let warnings = self.decode_with_visitor(payload, &mut builder, observer)?;

        Ok(builder.finish(warnings))
    }

    /// Decodes `payload`, delivering events to `visitor`. Returns the warnings recorded on the way.
    pub fn decode_with_visitor(
        &self,
        payload: &'a [u8],
        visitor: &mut impl BinXmlVisitor,
        observer: &mut impl DecodeObserver,
    ) -> Result<Vec<DecodeWarning>> {
        let ctx = TokenContext {
            chunk: self.chunk,
            ansi_codec: self.settings.get_ansi_codec(),
        };
        let max_depth = self.settings.get_max_nesting_depth();
        let input_len = self.chunk.map_or(0, <[u8]>::len).max(payload.len());
        let mut budget = ExpansionBudget {
            used: 0,
            limit: self.settings.get_max_template_expansion(input_len),
        };

        let mut frames = vec![Frame {
            cursor: ByteCursor::new(payload, self.base_offset),
            source: FrameSource::Payload,
            substitutions: None,
        }];
        let mut warnings = vec![];
        let mut open_elements: usize = 0;

        let end_offset = loop {
            let frame_index = frames.len() - 1;
            let mut cursor = frames[frame_index].cursor;

            if cursor.is_eof() {
                if frame_index == 0 {
                    let warning = DecodeWarning::MissingEndOfStream {
                        offset: cursor.position(),
                    };
                    observer.warning(&warning);
                    warnings.push(warning);
                    break cursor.position();
                }
                trace!("Frame {} ended without an end of stream token", frame_index);
                frames.pop();
                continue;
            }

            let offset = cursor.position();
            let (raw_token, bits_warning) = self.read_raw_token(&mut cursor)?;
            let token = read_token(&mut cursor, raw_token, ctx)?;

            observer.token(offset, &token);
            if let Some(warning) = bits_warning {
                observer.warning(&warning);
                warnings.push(warning);
            }
            frames[frame_index].cursor = cursor;

            match token {
                BinXmlToken::EndOfStream => {
                    if frame_index == 0 {
                        break offset;
                    }
                    frames.pop();
                }
                BinXmlToken::OpenStartElement(elem) => {
                    if open_elements >= max_depth {
                        return Err(DeserializationError::NestingTooDeep {
                            offset,
                            limit: max_depth,
                        });
                    }
                    visitor.visit_open_start_element(offset, &elem)?;
                    open_elements += 1;
                }
                BinXmlToken::CloseStartElement => visitor.visit_close_start_element(offset)?,
                BinXmlToken::CloseEmptyElement => {
                    visitor.visit_close_empty_element(offset)?;
                    open_elements = open_elements.saturating_sub(1);
                }
                BinXmlToken::EndElement => {
                    visitor.visit_end_element(offset)?;
                    open_elements = open_elements.saturating_sub(1);
                }
                BinXmlToken::Value(value) => visitor.visit_value(offset, value)?,
                BinXmlToken::Attribute(attr) => visitor.visit_attribute(offset, &attr)?,
                BinXmlToken::CDataSection(text) => visitor.visit_cdata_section(offset, text)?,
                BinXmlToken::CharReference(value) => {
                    visitor.visit_character_reference(offset, value)?
                }
                BinXmlToken::EntityReference(entity) => {
                    visitor.visit_entity_reference(offset, &entity)?
                }
                BinXmlToken::ProcessingInstructionTarget(target) => {
                    visitor.visit_processing_instruction_target(offset, &target)?
                }
                BinXmlToken::ProcessingInstructionData(data) => {
                    visitor.visit_processing_instruction_data(offset, data)?
                }
                BinXmlToken::FragmentHeader(header) => {
                    visitor.visit_fragment_header(offset, &header)?
                }
                BinXmlToken::TemplateInstance(template) => {
                    self.push_template(&mut frames, &mut budget, offset, template)?
                }
                BinXmlToken::Substitution(descriptor) => {
                    self.substitute(&mut frames, &mut budget, offset, descriptor, visitor)?
                }
            }
        };

        if open_elements > 0 {
            return Err(DeserializationError::PrematureEndOfStream {
                offset: end_offset,
                open_elements,
            });
        }

        Ok(warnings)
    }

    /// Reads a tag byte. In lenient mode, flag bits a token does not define are dropped and
    /// reported as a warning.
    fn read_raw_token(
        &self,
        cursor: &mut ByteCursor<'a>,
    ) -> Result<(BinXmlRawToken, Option<DecodeWarning>)> {
        let offset = cursor.position();
        let value = cursor.u8_named("token")?;

        if let Some(raw_token) = BinXmlRawToken::from_u8(value) {
            return Ok((raw_token, None));
        }

        if !self.settings.is_strict_tokens() {
            if let Some(raw_token) = BinXmlRawToken::from_u8_lenient(value) {
                return Ok((
                    raw_token,
                    Some(DecodeWarning::ReservedTokenBits { offset, value }),
                ));
            }
        }

        Err(DeserializationError::UnknownToken { offset, value })
    }

    fn push_template(
        &self,
        frames: &mut Vec<Frame<'a>>,
        budget: &mut ExpansionBudget,
        offset: u64,
        template: BinXmlTemplateRef<'a>,
    ) -> Result<()> {
        let template_id = template.template_id;

        if frames.iter().any(|f| f.template_id() == Some(template_id)) {
            return Err(DeserializationError::RecursiveTemplate {
                offset,
                template_id,
            });
        }
        self.check_frame_depth(frames, offset)?;

        let (body, body_offset) = self.template_body(offset, &template)?;
        budget.charge(offset, body.len())?;
        debug!(
            "Template {} at offset {}: {} byte body, {} substitution value(s)",
            template_id,
            offset,
            body.len(),
            template.substitution_array.len()
        );

        frames.push(Frame {
            cursor: ByteCursor::new(body, body_offset),
            source: FrameSource::Template { template_id },
            substitutions: Some(template.substitution_array),
        });

        Ok(())
    }

    /// Finds the body of a template: inline, from the resolver, then from the chunk.
    fn template_body(
        &self,
        offset: u64,
        template: &BinXmlTemplateRef<'a>,
    ) -> Result<(&'a [u8], u64)> {
        if let Some(definition) = &template.definition {
            return Ok((definition.data, definition.data_offset));
        }

        let definition_offset: ChunkOffset = template.definition_offset;
        let body_offset =
            u64::from(definition_offset) + u64::from(TEMPLATE_DEFINITION_HEADER_SIZE);

        if let Some(body) = self
            .templates
            .and_then(|templates| templates.resolve_template(template.template_id))
        {
            return Ok((body, body_offset));
        }

        if let Some(chunk) = self.chunk {
            let definition = ByteCursor::with_pos(chunk, definition_offset as usize, 0)
                .and_then(|mut cursor| read_template_definition(&mut cursor));

            match definition {
                Ok(definition) => return Ok((definition.data, definition.data_offset)),
                Err(e) => trace!("Failed to read template definition from chunk: {}", e),
            }
        }

        Err(DeserializationError::UnknownTemplate {
            offset,
            template_id: template.template_id,
            definition_offset,
        })
    }

    fn substitute(
        &self,
        frames: &mut Vec<Frame<'a>>,
        budget: &mut ExpansionBudget,
        offset: u64,
        descriptor: TemplateSubstitutionDescriptor,
        visitor: &mut impl BinXmlVisitor,
    ) -> Result<()> {
        let index = usize::from(descriptor.substitution_index);

        // Substitutions bind to the innermost template frame.
        let bound = frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, frame)| frame.substitutions.as_ref().map(|values| (i, values)));

        let (array_frame, value) = match bound {
            Some((array_frame, values)) => match values.get(index) {
                Some(value) => (array_frame, value.clone()),
                None if descriptor.optional => {
                    return visitor.visit_value(offset, BinXmlValue::NullType);
                }
                None => {
                    return Err(DeserializationError::SubstitutionOutOfRange {
                        offset,
                        index: descriptor.substitution_index,
                        count: values.len(),
                    });
                }
            },
            None if descriptor.optional => {
                return visitor.visit_value(offset, BinXmlValue::NullType);
            }
            None => {
                return Err(DeserializationError::SubstitutionOutOfRange {
                    offset,
                    index: descriptor.substitution_index,
                    count: 0,
                });
            }
        };

        match value {
            TemplateValue::Value(value) => visitor.visit_value(offset, value),
            TemplateValue::BinXml {
                data,
                offset: data_offset,
            } => {
                let source = FrameSource::Fragment { array_frame, index };

                if frames.iter().any(|f| f.source == source) {
                    return Err(DeserializationError::RecursiveTemplate {
                        offset,
                        template_id: frames[array_frame].template_id().unwrap_or_default(),
                    });
                }
                self.check_frame_depth(frames, offset)?;
                budget.charge(offset, data.len())?;

                frames.push(Frame {
                    cursor: ByteCursor::new(data, data_offset),
                    source,
                    substitutions: None,
                });

                Ok(())
            }
        }
    }

    fn check_frame_depth(&self, frames: &[Frame<'a>], offset: u64) -> Result<()> {
        let limit = self.settings.get_max_nesting_depth();

        if frames.len() >= limit {
            return Err(DeserializationError::NestingTooDeep { offset, limit });
        }

        Ok(())
    }
}

/// Decodes a detached payload with default settings.
///
/// Names and template definitions must be inline, offsets are relative to the payload start.
pub fn decode(payload: &[u8]) -> Result<Document> {
    BinXmlDecoder::new().decode(payload, &mut NoopObserver)
}
