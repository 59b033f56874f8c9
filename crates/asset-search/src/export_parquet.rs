use crate::parser::ConditionTree;
use crate::{AssetKind, Db, SearchRecord};
use anyhow::Result;
use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

use crate::arrow_schemas;

const CHUNK: usize = 10_000;

/// Streams every match of `tree` into a ZSTD-compressed Parquet file. Returns the row count.
pub fn export_search_to_parquet(db: &Db, tree: &ConditionTree, kind: AssetKind, out: &std::path::Path) -> Result<usize> {
    let schema = Arc::new(arrow_schemas::search_records_schema());
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(Default::default()))
        .build();
    let file = std::fs::File::create(out)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let mut stream = db.search_stream(tree, kind, db.settings().stream_batch_size);
    let mut total = 0;
    loop {
        let mut batch = RecordColumns::default();
        while batch.len < CHUNK {
            let Some(rec) = stream.next() else { break };
            batch.push(&rec?)?;
        }
        if batch.len == 0 {
            break;
        }
        total += batch.len;
        let rb = RecordBatch::try_new(schema.clone(), batch.finish())?;
        writer.write(&rb)?;
    }
    writer.close()?;
    tracing::info!(%kind, rows = total, windows = stream.windows_fetched(), path = %out.display(), "search results exported");
    Ok(total)
}

#[derive(Default)]
struct RecordColumns {
    len: usize,
    id: Int64Builder,
    target_id: Int64Builder,
    url: StringBuilder,
    host: StringBuilder,
    title: StringBuilder,
    status_code: Int64Builder,
    content_length: Int64Builder,
    webserver: StringBuilder,
    content_type: StringBuilder,
    location: StringBuilder,
    tech: StringBuilder,
    patterns: StringBuilder,
    vuln_count: Int64Builder,
    created: Int64Builder,
}

impl RecordColumns {
    fn push(&mut self, r: &SearchRecord) -> Result<()> {
        self.id.append_value(r.id);
        self.target_id.append_value(r.target_id);
        self.url.append_value(&r.url);
        self.host.append_value(&r.host);
        self.title.append_value(&r.title);
        self.status_code.append_option(r.status_code);
        self.content_length.append_option(r.content_length);
        self.webserver.append_value(&r.webserver);
        self.content_type.append_value(&r.content_type);
        self.location.append_value(&r.location);
        self.tech.append_value(serde_json::to_string(&r.tech)?);
        self.patterns.append_value(serde_json::to_string(&r.matched_patterns)?);
        self.vuln_count.append_value(r.vulnerabilities.len() as i64);
        self.created.append_value(r.created_at_ms);
        self.len += 1;
        Ok(())
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.id.finish()),
            Arc::new(self.target_id.finish()),
            Arc::new(self.url.finish()),
            Arc::new(self.host.finish()),
            Arc::new(self.title.finish()),
            Arc::new(self.status_code.finish()),
            Arc::new(self.content_length.finish()),
            Arc::new(self.webserver.finish()),
            Arc::new(self.content_type.finish()),
            Arc::new(self.location.finish()),
            Arc::new(self.tech.finish()),
            Arc::new(self.patterns.finish()),
            Arc::new(self.vuln_count.finish()),
            Arc::new(self.created.finish()),
        ]
    }
}
