use cang_jie::{CangJieTokenizer, TokenizerOption};
use jieba_rs::Jieba;
use std::sync::Arc;
use tantivy::schema::{
    IndexRecordOption, JsonObjectOptions, Schema, SchemaBuilder, TextFieldIndexing, FAST, INDEXED,
    STORED, STRING,
};
use tantivy::tokenizer::TokenizerManager;
use tantivy::Index;

/// Name under which the CJK "search mode" tokenizer is registered on every
/// index's `TokenizerManager`. "Search mode" segmentation (as opposed to
/// "index mode") favors shorter, higher-recall tokens — the right default
/// for a text-search index rather than an NLP pipeline.
pub const CANG_JIE_TOKENIZER: &str = "cang_jie";

/// Field handles for the message document schema.
#[derive(Debug, Clone)]
pub struct MessageFields {
    pub message_id: tantivy::schema::Field,
    pub from_uid: tantivy::schema::Field,
    pub channel_id: tantivy::schema::Field,
    pub channel_type: tantivy::schema::Field,
    pub message_seq: tantivy::schema::Field,
    pub client_msg_no: tantivy::schema::Field,
    pub stream_no: tantivy::schema::Field,
    pub stream_id: tantivy::schema::Field,
    pub topic: tantivy::schema::Field,
    pub timestamp: tantivy::schema::Field,
    /// Dynamic JSON object holding every `payload.*` subfield. `content` is
    /// tokenized with the CJK search-mode analyzer and keeps term vectors
    /// for highlighting; every other subfield rides the same tokenizer —
    /// jieba degrades gracefully to word-ish tokens on non-CJK text, which
    /// is an acceptable simplification for subfields with no dedicated
    /// analyzer of their own.
    pub payload: tantivy::schema::Field,
    /// Raw JSON payload, stored only, used to reconstruct the exact
    /// original payload in search results without relying on the (lossy)
    /// indexed JSON field reconstruction.
    pub payload_json: tantivy::schema::Field,
}

pub struct MessageSchema {
    pub schema: Schema,
    pub fields: MessageFields,
}

impl MessageSchema {
    pub fn build() -> Self {
        let mut builder: SchemaBuilder = Schema::builder();

        let message_id = builder.add_text_field("message_id", STRING | STORED);
        let from_uid = builder.add_text_field("from_uid", STRING | STORED);
        let channel_id = builder.add_text_field("channel_id", STRING | STORED | FAST);
        let channel_type = builder.add_u64_field("channel_type", INDEXED | STORED | FAST);
        let message_seq = builder.add_u64_field("message_seq", INDEXED | STORED);
        let client_msg_no = builder.add_text_field("client_msg_no", STRING | STORED);
        let stream_no = builder.add_text_field("stream_no", STRING | STORED);
        let stream_id = builder.add_u64_field("stream_id", STORED);
        let topic = builder.add_text_field("topic", STRING | STORED);
        let timestamp = builder.add_u64_field("timestamp", INDEXED | STORED | FAST);

        let cjk_indexing = TextFieldIndexing::default()
            .set_tokenizer(CANG_JIE_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let payload_opts: JsonObjectOptions = JsonObjectOptions::default()
            .set_stored()
            .set_indexing_options(cjk_indexing);
        let payload = builder.add_json_field("payload", payload_opts);

        let payload_json = builder.add_text_field("payload_json", STORED);

        let schema = builder.build();
        Self {
            schema,
            fields: MessageFields {
                message_id,
                from_uid,
                channel_id,
                channel_type,
                message_seq,
                client_msg_no,
                stream_no,
                stream_id,
                topic,
                timestamp,
                payload,
                payload_json,
            },
        }
    }
}

/// Registers the CJK search-mode tokenizer on an index's tokenizer manager.
/// Must be called both when creating a fresh index and when re-opening an
/// existing one — tantivy does not persist tokenizer registrations.
pub fn register_tokenizers(index: &Index) {
    let manager: &TokenizerManager = index.tokenizers();
    manager.register(
        CANG_JIE_TOKENIZER,
        CangJieTokenizer {
            worker: Arc::new(Jieba::new()),
            option: TokenizerOption::Search,
        },
    );
}
