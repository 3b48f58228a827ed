use std::ops::Bound;

use search_core::types::SearchReq;
use tantivy::query::{BooleanQuery, Occur, Query, RangeQuery, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::tokenizer::TokenizerManager;
use tantivy::Term;

use crate::error::{IndexError, Result};
use crate::schema::{MessageFields, CANG_JIE_TOKENIZER};

/// Translates a [`SearchReq`] into a tantivy query: every clause is omitted
/// when its source field is empty/unset, and the whole request becomes a
/// conjunction ("must") of whichever clauses are present.
pub fn build_query(
    req: &SearchReq,
    fields: &MessageFields,
    tokenizers: &TokenizerManager,
) -> Result<Box<dyn Query>> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    if let Some(from_uid) = req.from_uid.as_deref().filter(|s| !s.is_empty()) {
        clauses.push((Occur::Must, term_query(fields.from_uid, from_uid)));
    }

    if !req.channels.is_empty() {
        let per_channel: Vec<(Occur, Box<dyn Query>)> = req
            .channels
            .iter()
            .map(|c| {
                (
                    Occur::Should,
                    channel_clause(fields, c.channel_id.as_str(), c.channel_type),
                )
            })
            .collect();
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(per_channel))));
    }

    if let Some(channel_id) = req.channel_id.as_deref().filter(|s| !s.is_empty()) {
        clauses.push((
            Occur::Must,
            channel_clause(fields, channel_id, req.channel_type.unwrap_or(0)),
        ));
    }

    if !req.payload.is_empty() {
        let mut per_key = Vec::new();
        for (key, text) in &req.payload {
            if text.is_empty() {
                continue;
            }
            per_key.push((Occur::Should, payload_match_query(fields, tokenizers, key, text)?));
        }
        if !per_key.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(per_key))));
        }
    }

    if let Some(topic) = req.topic.as_deref().filter(|s| !s.is_empty()) {
        clauses.push((Occur::Must, term_query(fields.topic, topic)));
    }

    if !req.payload_types.is_empty() {
        let per_type: Vec<(Occur, Box<dyn Query>)> = req
            .payload_types
            .iter()
            .map(|t| (Occur::Should, payload_type_range_query(fields, *t)))
            .collect();
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(per_type))));
    }

    if req.start_time.is_some() || req.end_time.is_some() {
        let lower = req.start_time.map(|t| t as u64).unwrap_or(0);
        // end_time is inclusive: [start, end+1).
        let upper = req
            .end_time
            .map(|t| t as u64 + 1)
            .unwrap_or(u64::MAX);
        clauses.push((
            Occur::Must,
            Box::new(RangeQuery::new_u64(fields.timestamp, lower..upper)),
        ));
    }

    if clauses.is_empty() {
        return Err(IndexError::Query(
            "search request produced no clauses".to_string(),
        ));
    }

    Ok(Box::new(BooleanQuery::new(clauses)))
}

fn term_query(field: tantivy::schema::Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}

/// `(channel_id term AND channel_type range [t, t+1))`; `channel_type == 0`
/// means "unset" so the range half is omitted.
fn channel_clause(fields: &MessageFields, channel_id: &str, channel_type: u8) -> Box<dyn Query> {
    let id_clause = term_query(fields.channel_id, channel_id);
    if channel_type == 0 {
        return id_clause;
    }
    let lo = channel_type as u64;
    let type_clause: Box<dyn Query> = Box::new(RangeQuery::new_u64(
        fields.channel_type,
        lo..lo + 1,
    ));
    Box::new(BooleanQuery::new(vec![
        (Occur::Must, id_clause),
        (Occur::Must, type_clause),
    ]))
}

/// A "match" query on `payload.<key>`: tokenize `text` with the same
/// analyzer the field was indexed with, then require every resulting token
/// (AND within one key; different keys OR together at the call site).
fn payload_match_query(
    fields: &MessageFields,
    tokenizers: &TokenizerManager,
    key: &str,
    text: &str,
) -> Result<Box<dyn Query>> {
    let mut analyzer = tokenizers
        .get(CANG_JIE_TOKENIZER)
        .ok_or_else(|| IndexError::Query("cang_jie tokenizer not registered".to_string()))?;
    let mut token_stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    token_stream.process(&mut |token| {
        let mut term = Term::from_field_json_path(fields.payload, key, false);
        term.append_type_and_str(&token.text);
        terms.push((Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>));
    });
    if terms.is_empty() {
        return Ok(term_query(fields.payload, text));
    }
    Ok(Box::new(BooleanQuery::new(terms)))
}

fn payload_type_range_query(fields: &MessageFields, payload_type: i64) -> Box<dyn Query> {
    let mut lower = Term::from_field_json_path(fields.payload, "type", false);
    lower.append_type_and_fast_value(payload_type);
    let mut upper = Term::from_field_json_path(fields.payload, "type", false);
    upper.append_type_and_fast_value(payload_type + 1);
    Box::new(RangeQuery::new_term_bounds(
        fields.payload,
        tantivy::schema::Type::I64,
        &Bound::Included(lower),
        &Bound::Excluded(upper),
    ))
}
