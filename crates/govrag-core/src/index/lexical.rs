//! Lexical Index Adapter — tantivy-backed `LexicalIndex`.
//!
//! Grounded on `search/text_search.rs::TextSearch`: same schema-building /
//! `QueryParser` / `TopDocs` shape, generalised to carry full `Chunk`
//! metadata (doc_id, page, spans, kind) as stored fields and to support
//! `allowed_doc_ids` filtering.

use std::path::Path;

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::{self, Schema, Value as TantivyValue, INDEXED, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use super::{IndexHit, LexicalIndex};
use crate::error::GovRagError;
use crate::types::{Chunk, ChunkKind};

pub struct TantivyLexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    chunk_id_field: schema::Field,
    doc_id_field: schema::Field,
    text_field: schema::Field,
    page_field: schema::Field,
    char_start_field: schema::Field,
    char_end_field: schema::Field,
    kind_field: schema::Field,
}

impl TantivyLexicalIndex {
    pub fn open(path: &Path) -> Result<Self, GovRagError> {
        std::fs::create_dir_all(path)?;

        let mut sb = Schema::builder();
        let chunk_id_field = sb.add_text_field("chunk_id", STRING | STORED);
        let doc_id_field = sb.add_text_field("doc_id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        let page_field = sb.add_u64_field("page", INDEXED | STORED);
        let char_start_field = sb.add_u64_field("char_start", STORED);
        let char_end_field = sb.add_u64_field("char_end", STORED);
        let kind_field = sb.add_text_field("kind", STRING | STORED);
        let schema = sb.build();

        let dir = tantivy::directory::MmapDirectory::open(path)
            .map_err(|e| GovRagError::RetrievalUnavailable { reason: e.to_string() })?;
        let index = if Index::exists(&dir).unwrap_or(false) {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, schema)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            chunk_id_field,
            doc_id_field,
            text_field,
            page_field,
            char_start_field,
            char_end_field,
            kind_field,
        })
    }

    pub fn index_chunk(&self, chunk: &Chunk) -> Result<(), GovRagError> {
        let writer = self.writer.lock();
        writer.add_document(doc!(
            self.chunk_id_field => chunk.chunk_id.as_str(),
            self.doc_id_field => chunk.doc_id.as_str(),
            self.text_field => chunk.text.as_str(),
            self.page_field => chunk.page as u64,
            self.char_start_field => chunk.char_start as u64,
            self.char_end_field => chunk.char_end as u64,
            self.kind_field => kind_label(chunk.kind),
        ))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<(), GovRagError> {
        let mut writer = self.writer.lock();
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn doc_to_chunk(&self, d: &TantivyDocument) -> Option<Chunk> {
        let chunk_id = d.get_first(self.chunk_id_field)?.as_str()?.to_string();
        let doc_id = d.get_first(self.doc_id_field)?.as_str()?.to_string();
        let text = d.get_first(self.text_field)?.as_str()?.to_string();
        let page = d.get_first(self.page_field)?.as_u64()? as u32;
        let char_start = d.get_first(self.char_start_field)?.as_u64()? as usize;
        let char_end = d.get_first(self.char_end_field)?.as_u64()? as usize;
        let kind = match d.get_first(self.kind_field)?.as_str()? {
            "table" => ChunkKind::Table,
            "footnote" => ChunkKind::Footnote,
            _ => ChunkKind::Body,
        };
        Some(Chunk {
            chunk_id,
            doc_id,
            page,
            char_start,
            char_end,
            kind,
            text,
            backlink_id: None,
        })
    }
}

fn kind_label(kind: ChunkKind) -> &'static str {
    match kind {
        ChunkKind::Body => "body",
        ChunkKind::Table => "table",
        ChunkKind::Footnote => "footnote",
    }
}

#[async_trait]
impl LexicalIndex for TantivyLexicalIndex {
    async fn search(
        &self,
        query: &str,
        k: usize,
        allowed_doc_ids: Option<&[String]>,
    ) -> Result<Vec<IndexHit>, GovRagError> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = query_parser
            .parse_query(query)
            .map_err(|e| GovRagError::RetrievalUnavailable { reason: e.to_string() })?;

        let boxed_query: Box<dyn tantivy::query::Query> = match allowed_doc_ids {
            Some(ids) if !ids.is_empty() => {
                let doc_filter = BooleanQuery::new(
                    ids.iter()
                        .map(|id| {
                            let term = Term::from_field_text(self.doc_id_field, id);
                            (
                                Occur::Should,
                                Box::new(TermQuery::new(term, schema::IndexRecordOption::Basic))
                                    as Box<dyn tantivy::query::Query>,
                            )
                        })
                        .collect::<Vec<_>>(),
                );
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, parsed),
                    (Occur::Must, Box::new(doc_filter)),
                ]))
            }
            _ => parsed,
        };

        let top_docs = searcher.search(&boxed_query, &TopDocs::with_limit(k))?;
        let hits = top_docs
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (score, addr))| {
                let d: TantivyDocument = searcher.doc(addr).ok()?;
                let chunk_id = d.get_first(self.chunk_id_field)?.as_str()?.to_string();
                Some(IndexHit {
                    chunk_id,
                    score,
                    rank,
                })
            })
            .collect();
        Ok(hits)
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError> {
        let searcher = self.reader.searcher();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let term = Term::from_field_text(self.chunk_id_field, id);
            let term_query = TermQuery::new(term, schema::IndexRecordOption::Basic);
            let top = searcher.search(&term_query, &TopDocs::with_limit(1))?;
            if let Some((_, addr)) = top.first() {
                let d: TantivyDocument = searcher.doc(*addr)?;
                if let Some(chunk) = self.doc_to_chunk(&d) {
                    out.push(chunk);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Runtime;

    fn sample_chunk(doc_id: &str, chunk_id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.into(),
            doc_id: doc_id.into(),
            page: 2,
            char_start: 120,
            char_end: 260,
            kind: ChunkKind::Body,
            text: text.into(),
            backlink_id: None,
        }
    }

    #[test]
    fn search_finds_indexed_chunk_and_respects_doc_filter() {
        let dir = tempfile::tempdir().unwrap();
        let idx = TantivyLexicalIndex::open(dir.path()).unwrap();
        idx.index_chunk(&sample_chunk("D1", "c1", "2024년 예산은 100억 원")).unwrap();
        idx.index_chunk(&sample_chunk("D2", "c2", "감천문화마을 위치 안내")).unwrap();
        idx.commit().unwrap();

        let rt = Runtime::new().unwrap();
        let hits = rt
            .block_on(idx.search("예산", 10, None))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");

        let filtered = rt
            .block_on(idx.search("예산", 10, Some(&["D2".to_string()])))
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn get_chunks_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let idx = TantivyLexicalIndex::open(dir.path()).unwrap();
        idx.index_chunk(&sample_chunk("D1", "c1", "sample text")).unwrap();
        idx.commit().unwrap();

        let rt = Runtime::new().unwrap();
        let chunks = rt.block_on(idx.get_chunks(&["c1".to_string()])).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "D1");
        assert_eq!(chunks[0].char_start, 120);
        assert_eq!(chunks[0].char_end, 260);
    }
}
