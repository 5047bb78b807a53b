use crate::binxml::tokens::{
    BinXmlAttribute, BinXmlEntityReference, BinXmlFragmentHeader, BinXmlOpenStartElement,
    BinXmlProcessingInstructionTarget,
};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::DeserializationResult as Result;

/// Receives the document events produced by the decoder, after templates and substitutions
/// have been expanded.
///
/// `offset` is the absolute offset of the token that produced the event. For substituted values
/// it is the offset of the substitution token.
pub trait BinXmlVisitor {
    fn visit_fragment_header(&mut self, offset: u64, header: &BinXmlFragmentHeader) -> Result<()>;
    fn visit_open_start_element(
        &mut self,
        offset: u64,
        open_start_element: &BinXmlOpenStartElement,
    ) -> Result<()>;
    fn visit_close_start_element(&mut self, offset: u64) -> Result<()>;
    fn visit_close_empty_element(&mut self, offset: u64) -> Result<()>;
    fn visit_end_element(&mut self, offset: u64) -> Result<()>;
    fn visit_attribute(&mut self, offset: u64, attribute: &BinXmlAttribute) -> Result<()>;
    fn visit_value(&mut self, offset: u64, value: BinXmlValue) -> Result<()>;
    fn visit_cdata_section(&mut self, offset: u64, text: String) -> Result<()>;
    fn visit_character_reference(&mut self, offset: u64, value: u16) -> Result<()>;
    fn visit_entity_reference(
        &mut self,
        offset: u64,
        entity: &BinXmlEntityReference,
    ) -> Result<()>;
    fn visit_processing_instruction_target(
        &mut self,
        offset: u64,
        target: &BinXmlProcessingInstructionTarget,
    ) -> Result<()>;
    fn visit_processing_instruction_data(&mut self, offset: u64, data: String) -> Result<()>;
}
