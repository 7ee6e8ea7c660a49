//! Wire serialization of a finalized native query
//!
//! The store accepts its query tree as XML. Serialization assumes a finalized
//! tree; an undetermined filter operator here panics in debug builds because
//! it can only mean finalization was skipped.

use super::tree::{FetchQuery, LogicalOp, Node, NodeId};
use std::fmt::{self, Write};

impl FetchQuery {
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        // Infallible: writing to a String cannot fail.
        let _ = self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) -> fmt::Result {
        write!(out, "<fetch")?;
        if self.aggregate {
            write!(out, " aggregate=\"true\"")?;
        }
        if self.distinct {
            write!(out, " distinct=\"true\"")?;
        }
        if let Some(top) = self.top {
            write!(out, " top=\"{}\"", top)?;
        }
        if let Some(paging) = self.paging {
            write!(out, " page=\"{}\" count=\"{}\"", paging.page_number, paging.page_size)?;
        }
        writeln!(out, ">")?;
        self.write_node(out, self.root, 1)?;
        writeln!(out, "</fetch>")
    }

    fn write_node(&self, out: &mut String, id: NodeId, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self.node(id) {
            Node::Entity { name, children } => {
                writeln!(out, "{}<entity name=\"{}\">", pad, escape(name))?;
                for &child in children {
                    self.write_node(out, child, depth + 1)?;
                }
                writeln!(out, "{}</entity>", pad)
            }
            Node::Link {
                entity,
                alias,
                kind,
                from,
                to,
                children,
            } => {
                writeln!(
                    out,
                    "{}<link-entity name=\"{}\" alias=\"{}\" link-type=\"{}\" from=\"{}\" to=\"{}\">",
                    pad,
                    escape(entity),
                    escape(alias),
                    kind.wire_name(),
                    escape(to),
                    escape(from),
                )?;
                for &child in children {
                    self.write_node(out, child, depth + 1)?;
                }
                writeln!(out, "{}</link-entity>", pad)
            }
            Node::AllAttributes => writeln!(out, "{}<all-attributes />", pad),
            Node::Attribute {
                name,
                alias,
                aggregate,
                distinct,
                date_grouping,
                group_by,
            } => {
                write!(out, "{}<attribute name=\"{}\"", pad, escape(name))?;
                if let Some(alias) = alias {
                    write!(out, " alias=\"{}\"", escape(alias))?;
                }
                if let Some(agg) = aggregate {
                    write!(out, " aggregate=\"{}\"", agg.wire_name())?;
                }
                if *distinct {
                    write!(out, " distinct=\"true\"")?;
                }
                if *group_by {
                    write!(out, " groupby=\"true\"")?;
                }
                if let Some(grouping) = date_grouping {
                    write!(out, " dategrouping=\"{}\"", grouping.wire_name())?;
                }
                writeln!(out, " />")
            }
            Node::Filter { op, children } => {
                let op_name = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                    LogicalOp::Undetermined => {
                        debug_assert!(false, "undetermined filter reached serialization");
                        "and"
                    }
                };
                writeln!(out, "{}<filter type=\"{}\">", pad, op_name)?;
                for &child in children {
                    self.write_node(out, child, depth + 1)?;
                }
                writeln!(out, "{}</filter>", pad)
            }
            Node::Condition {
                attribute,
                op,
                values,
                value_of,
            } => {
                write!(
                    out,
                    "{}<condition attribute=\"{}\" operator=\"{}\"",
                    pad,
                    escape(attribute),
                    op.wire_name()
                )?;
                if let Some(other) = value_of {
                    writeln!(out, " valueof=\"{}\" />", escape(other))
                } else if values.len() == 1 {
                    writeln!(out, " value=\"{}\" />", escape(&values[0].to_string()))
                } else if values.is_empty() {
                    writeln!(out, " />")
                } else {
                    writeln!(out, ">")?;
                    for value in values {
                        writeln!(
                            out,
                            "{}  <value>{}</value>",
                            pad,
                            escape(&value.to_string())
                        )?;
                    }
                    writeln!(out, "{}</condition>", pad)
                }
            }
            Node::Order {
                attribute,
                descending,
            } => {
                write!(out, "{}<order attribute=\"{}\"", pad, escape(attribute))?;
                if *descending {
                    write!(out, " descending=\"true\"")?;
                }
                writeln!(out, " />")
            }
        }
    }
}

impl fmt::Display for FetchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tree::ConditionOp;
    use crate::types::Value;

    #[test]
    fn renders_filter_and_order() {
        let mut tree = FetchQuery::new("account");
        let root = tree.root();
        tree.add_attribute(root, "name");
        let filter = tree.ensure_filter(root);
        tree.add_child(
            filter,
            Node::condition("name", ConditionOp::Eq, vec![Value::Str("Acme".into())]),
        );
        tree.add_child(
            root,
            Node::Order {
                attribute: "name".into(),
                descending: true,
            },
        );
        tree.finalize();

        let xml = tree.to_xml();
        assert!(xml.contains("<entity name=\"account\">"));
        assert!(xml.contains("<condition attribute=\"name\" operator=\"eq\" value=\"Acme\" />"));
        assert!(xml.contains("<order attribute=\"name\" descending=\"true\" />"));
    }

    #[test]
    fn escapes_values() {
        let mut tree = FetchQuery::new("t");
        let root = tree.root();
        let filter = tree.ensure_filter(root);
        tree.add_child(
            filter,
            Node::condition("name", ConditionOp::Eq, vec![Value::Str("a<b&c".into())]),
        );
        tree.finalize();
        assert!(tree.to_xml().contains("a&lt;b&amp;c"));
    }
}
