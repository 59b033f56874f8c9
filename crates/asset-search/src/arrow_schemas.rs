use arrow::datatypes::{DataType, Field, Schema};

pub fn search_records_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("target_id", DataType::Int64, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("host", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("status_code", DataType::Int64, true),
        Field::new("content_length", DataType::Int64, true),
        Field::new("webserver", DataType::Utf8, false),
        Field::new("content_type", DataType::Utf8, false),
        Field::new("location", DataType::Utf8, false),
        Field::new("tech_json", DataType::Utf8, false),
        Field::new("matched_patterns_json", DataType::Utf8, false),
        Field::new("vulnerability_count", DataType::Int64, false),
        Field::new("created_at_ms", DataType::Int64, false),
    ])
}
