use std::fmt::Write as FmtWrite;

use crate::models::{Answer, Document, IngestOutcome, OutputFormat, QueryRecord, SourceRef};
use crate::services::{ReconcileReport, SyncReport};

pub trait Formatter {
    fn format_outcome(&self, outcome: &IngestOutcome) -> String;
    fn format_documents(&self, owner: &str, documents: &[Document]) -> String;
    fn format_answer(&self, answer: &Answer) -> String;
    fn format_sources(&self, sources: &[SourceRef]) -> String;
    fn format_sync_report(&self, report: &SyncReport) -> String;
    fn format_reconcile(&self, report: &ReconcileReport, repair: bool) -> String;
    fn format_history(&self, records: &[QueryRecord]) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusInfo {
    pub owner: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub vector_store_driver: String,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub collection: String,
    pub metadata_driver: String,
    pub metadata_connected: bool,
    pub documents: Option<usize>,
    pub storage_path: String,
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn source_label(source: &SourceRef) -> String {
    match source.page {
        Some(page) => format!("{} (page {}, chunk {})", source.filename, page, source.chunk_index),
        None => format!("{} (chunk {})", source.filename, source.chunk_index),
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_outcome(&self, outcome: &IngestOutcome) -> String {
        let doc = outcome.document();
        match outcome {
            IngestOutcome::Created(_) => format!(
                "Ingested {} ({}, {} chunks)\n  id: {}\n",
                doc.filename,
                human_size(doc.file_size),
                doc.chunk_count,
                doc.id
            ),
            IngestOutcome::Duplicate(_) => format!(
                "Already ingested as {}\n  id: {}\n",
                doc.filename, doc.id
            ),
        }
    }

    fn format_documents(&self, owner: &str, documents: &[Document]) -> String {
        if documents.is_empty() {
            return format!("No documents for {}\n", owner);
        }

        let mut output = String::new();
        writeln!(output, "Documents for {} ({})", owner, documents.len()).unwrap();
        writeln!(output, "---------").unwrap();
        for doc in documents {
            writeln!(output, "{}  {}", doc.id, doc.filename).unwrap();
            writeln!(
                output,
                "  {} | {} chunks | {}",
                human_size(doc.file_size),
                doc.chunk_count,
                doc.created_at.format("%Y-%m-%d %H:%M:%S")
            )
            .unwrap();
        }
        output
    }

    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();
        writeln!(output, "{}", answer.answer.trim_end()).unwrap();
        output.push_str(&self.format_sources(&answer.sources));
        output
    }

    fn format_sources(&self, sources: &[SourceRef]) -> String {
        if sources.is_empty() {
            return String::new();
        }
        let mut output = String::new();
        writeln!(output, "\nSources:").unwrap();
        for (i, source) in sources.iter().enumerate() {
            writeln!(
                output,
                "  {}. {} [Score: {:.3}]",
                i + 1,
                source_label(source),
                source.score
            )
            .unwrap();
        }
        output
    }

    fn format_sync_report(&self, report: &SyncReport) -> String {
        let mut output = String::new();
        writeln!(output, "Sync Complete").unwrap();
        writeln!(output, "-------------").unwrap();
        writeln!(output, "Files scanned:   {}", report.scanned).unwrap();
        writeln!(output, "Files ingested:  {}", report.ingested).unwrap();
        writeln!(output, "Duplicates:      {}", report.duplicates).unwrap();
        writeln!(output, "Failed:          {}", report.failed).unwrap();
        output
    }

    fn format_reconcile(&self, report: &ReconcileReport, repair: bool) -> String {
        let mut output = String::new();
        writeln!(output, "Checked {} documents", report.checked).unwrap();
        if report.orphans.is_empty() {
            writeln!(output, "All indexes complete.").unwrap();
            return output;
        }
        writeln!(output, "Incomplete indexes: {}", report.orphans.len()).unwrap();
        for orphan in &report.orphans {
            writeln!(
                output,
                "  {}  {} (expected {} vectors, found {})",
                orphan.document.id, orphan.document.filename, orphan.expected, orphan.found
            )
            .unwrap();
        }
        if repair {
            writeln!(output, "Removed {} documents; ingest them again to rebuild.", report.repaired)
                .unwrap();
        } else {
            writeln!(output, "Run with --repair to remove them.").unwrap();
        }
        output
    }

    fn format_history(&self, records: &[QueryRecord]) -> String {
        if records.is_empty() {
            return "No questions asked yet.\n".to_string();
        }
        let mut output = String::new();
        for record in records {
            writeln!(
                output,
                "[{}] {}",
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.question
            )
            .unwrap();
            let preview: String = record.answer.chars().take(200).collect();
            let preview = if record.answer.chars().count() > 200 {
                format!("{}...", preview)
            } else {
                preview
            };
            for line in preview.lines() {
                writeln!(output, "   {}", line).unwrap();
            }
            writeln!(output).unwrap();
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();
        writeln!(output, "Owner:         {}", status.owner).unwrap();
        writeln!(output, "Embedding:     {}", status.embedding_model).unwrap();
        writeln!(output, "Completion:    {}", status.completion_model).unwrap();
        writeln!(output).unwrap();

        let vector_status = if status.vector_store_connected {
            "[CONNECTED]"
        } else {
            "[DISCONNECTED]"
        };
        writeln!(
            output,
            "Vector Store:  {} ({})",
            status.vector_store_driver, vector_status
        )
        .unwrap();
        writeln!(output, "  URL:         {}", status.vector_store_url).unwrap();
        writeln!(output, "  Collection:  {}", status.collection).unwrap();

        let metadata_status = if status.metadata_connected {
            "[CONNECTED]"
        } else {
            "[DISCONNECTED]"
        };
        writeln!(
            output,
            "Metadata:      {} ({})",
            status.metadata_driver, metadata_status
        )
        .unwrap();
        if let Some(count) = status.documents {
            writeln!(output, "  Documents:   {}", count).unwrap();
        }
        writeln!(output, "Storage:       {}", status.storage_path).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: serde::Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_outcome(&self, outcome: &IngestOutcome) -> String {
        self.render(outcome)
    }

    fn format_documents(&self, owner: &str, documents: &[Document]) -> String {
        self.render(&serde_json::json!({
            "owner": owner,
            "total": documents.len(),
            "documents": documents,
        }))
    }

    fn format_answer(&self, answer: &Answer) -> String {
        self.render(answer)
    }

    fn format_sources(&self, sources: &[SourceRef]) -> String {
        self.render(&serde_json::json!({ "sources": sources }))
    }

    fn format_sync_report(&self, report: &SyncReport) -> String {
        self.render(report)
    }

    fn format_reconcile(&self, report: &ReconcileReport, repair: bool) -> String {
        self.render(&serde_json::json!({
            "repair": repair,
            "checked": report.checked,
            "repaired": report.repaired,
            "orphans": report.orphans,
        }))
    }

    fn format_history(&self, records: &[QueryRecord]) -> String {
        self.render(&serde_json::json!({ "queries": records }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_outcome(&self, outcome: &IngestOutcome) -> String {
        let doc = outcome.document();
        let status = if outcome.is_duplicate() {
            "already ingested"
        } else {
            "ingested"
        };
        format!(
            "- `{}` {} ({} chunks, id `{}`)\n",
            doc.filename, status, doc.chunk_count, doc.id
        )
    }

    fn format_documents(&self, owner: &str, documents: &[Document]) -> String {
        if documents.is_empty() {
            return format!("## Documents\n\n*No documents for `{}`.*\n", owner);
        }

        let mut output = String::new();
        writeln!(output, "## Documents for `{}`\n", owner).unwrap();
        writeln!(output, "| ID | Filename | Size | Chunks | Created |").unwrap();
        writeln!(output, "|----|----------|------|--------|---------|").unwrap();
        for doc in documents {
            writeln!(
                output,
                "| `{}` | {} | {} | {} | {} |",
                doc.id,
                doc.filename,
                human_size(doc.file_size),
                doc.chunk_count,
                doc.created_at.format("%Y-%m-%d %H:%M")
            )
            .unwrap();
        }
        output
    }

    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();
        writeln!(output, "## {}\n", answer.question).unwrap();
        writeln!(output, "{}", answer.answer.trim_end()).unwrap();
        output.push_str(&self.format_sources(&answer.sources));
        output
    }

    fn format_sources(&self, sources: &[SourceRef]) -> String {
        if sources.is_empty() {
            return String::new();
        }
        let mut output = String::new();
        writeln!(output, "\n### Sources\n").unwrap();
        for source in sources {
            writeln!(output, "- `{}` (score {:.3})", source_label(source), source.score).unwrap();
        }
        output
    }

    fn format_sync_report(&self, report: &SyncReport) -> String {
        let mut output = String::new();
        writeln!(output, "## Sync Complete\n").unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Files scanned | {} |", report.scanned).unwrap();
        writeln!(output, "| Files ingested | {} |", report.ingested).unwrap();
        writeln!(output, "| Duplicates | {} |", report.duplicates).unwrap();
        writeln!(output, "| Failed | {} |", report.failed).unwrap();
        output
    }

    fn format_reconcile(&self, report: &ReconcileReport, repair: bool) -> String {
        let mut output = String::new();
        writeln!(output, "## Reconcile\n").unwrap();
        writeln!(output, "Checked **{}** documents.\n", report.checked).unwrap();
        if report.orphans.is_empty() {
            writeln!(output, "All indexes complete.").unwrap();
            return output;
        }
        writeln!(output, "| ID | Filename | Expected | Found |").unwrap();
        writeln!(output, "|----|----------|----------|-------|").unwrap();
        for orphan in &report.orphans {
            writeln!(
                output,
                "| `{}` | {} | {} | {} |",
                orphan.document.id, orphan.document.filename, orphan.expected, orphan.found
            )
            .unwrap();
        }
        if repair {
            writeln!(output, "\nRemoved **{}** documents.", report.repaired).unwrap();
        }
        output
    }

    fn format_history(&self, records: &[QueryRecord]) -> String {
        if records.is_empty() {
            return "## History\n\n*No questions asked yet.*\n".to_string();
        }
        let mut output = String::new();
        writeln!(output, "## History\n").unwrap();
        for record in records {
            writeln!(
                output,
                "### {}\n\n*{}*\n",
                record.question,
                record.created_at.format("%Y-%m-%d %H:%M")
            )
            .unwrap();
            writeln!(output, "{}\n", record.answer.trim_end()).unwrap();
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "## Status\n").unwrap();
        writeln!(output, "- **Owner:** `{}`", status.owner).unwrap();
        writeln!(output, "- **Embedding:** {}", status.embedding_model).unwrap();
        writeln!(output, "- **Completion:** {}", status.completion_model).unwrap();
        writeln!(output).unwrap();

        let vector_status = if status.vector_store_connected { "✅" } else { "❌" };
        writeln!(
            output,
            "### Vector Store ({}) {}\n",
            status.vector_store_driver, vector_status
        )
        .unwrap();
        writeln!(output, "- **URL:** `{}`", status.vector_store_url).unwrap();
        writeln!(output, "- **Collection:** {}", status.collection).unwrap();
        writeln!(output).unwrap();

        let metadata_status = if status.metadata_connected { "✅" } else { "❌" };
        writeln!(
            output,
            "### Metadata ({}) {}\n",
            status.metadata_driver, metadata_status
        )
        .unwrap();
        if let Some(count) = status.documents {
            writeln!(output, "- **Documents:** {}", count).unwrap();
        }
        writeln!(output, "- **Storage:** `{}`", status.storage_path).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_answer() -> Answer {
        Answer {
            question: "What is the return policy?".to_string(),
            answer: "Items can be returned within 30 days.".to_string(),
            sources: vec![SourceRef {
                document_id: "d1".to_string(),
                filename: "policy.md".to_string(),
                page: None,
                chunk_index: 0,
                score: 0.91,
            }],
        }
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0 MB");
    }

    #[test]
    fn test_text_answer_lists_sources() {
        let output = TextFormatter.format_answer(&sample_answer());
        assert!(output.starts_with("Items can be returned within 30 days.\n"));
        assert!(output.contains("1. policy.md (chunk 0) [Score: 0.910]"));
    }

    #[test]
    fn test_json_answer_is_parseable() {
        let output = JsonFormatter::new(false).format_answer(&sample_answer());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["sources"][0]["filename"], "policy.md");
    }

    #[test]
    fn test_json_outcome_tags_status() {
        let doc = Document::new("alice", "a.txt", ".txt", 3, "abc", 1);
        let output = JsonFormatter::new(false).format_outcome(&IngestOutcome::Duplicate(doc));
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "duplicate");
        assert_eq!(value["document"]["filename"], "a.txt");
    }

    #[test]
    fn test_empty_documents_message() {
        assert_eq!(TextFormatter.format_documents("bob", &[]), "No documents for bob\n");
        assert!(MarkdownFormatter.format_documents("bob", &[]).contains("`bob`"));
    }
}
