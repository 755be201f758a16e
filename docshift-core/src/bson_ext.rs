//! Small helpers over [`bson::Document`].

use bson::{Bson, Document};
use std::fmt::Write;

/// Merges `documents` into one. When a key appears more than once, the later value wins.
pub fn combine_documents<I>(documents: I) -> Document
where
    I: IntoIterator<Item = Document>,
{
    let mut combined = Document::new();
    for document in documents {
        for (key, value) in document {
            combined.insert(key, value);
        }
    }
    combined
}

/// Renders `document` on a single line, e.g. `{age:{$gte:18},name:"Bob"}`.
pub fn pretty_document(document: &Document) -> String {
    let mut out = String::new();
    write_document(&mut out, document);
    out
}

fn write_document(out: &mut String, document: &Document) {
    out.push('{');
    for (i, (key, value)) in document.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Bson) {
    match value {
        Bson::Document(document) => write_document(out, document),
        Bson::Array(values) => {
            out.push('[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, value);
            }
            out.push(']');
        }
        Bson::String(s) => {
            let _ = write!(out, "{:?}", s);
        }
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn later_documents_win() {
        let combined = combine_documents([
            doc! { "a": 1, "b": 1 },
            doc! { "b": 2 },
            doc! { "c": 3 },
        ]);

        assert_eq!(combined, doc! { "a": 1, "b": 2, "c": 3 });
    }

    #[test]
    fn renders_nested_documents_compactly() {
        let rendered = pretty_document(&doc! {
            "age": { "$gte": 18 },
            "name": "Bob",
            "$or": [ { "a": true }, { "b": Bson::Null } ],
        });

        assert_eq!(rendered, r#"{age:{$gte:18},name:"Bob",$or:[{a:true},{b:null}]}"#);
    }
}
