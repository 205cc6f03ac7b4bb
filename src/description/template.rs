//! Parser for the markup embedded in rule descriptions.
//!
//! Only the handful of tags below carry meaning. Anything else, including
//! HTML-ish formatting, passes through as literal text and is cleaned up by
//! [`super::markup::strip_tags`] after rendering.

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Text(String),
    Replace {
        key: String,
        default: Option<String>,
        link: Option<String>,
    },
    Paragraph {
        body: Vec<TemplateNode>,
        alt: Vec<TemplateNode>,
    },
    IfDef {
        var: String,
        body: Vec<TemplateNode>,
    },
    IfNotDef {
        var: String,
        body: Vec<TemplateNode>,
    },
    ConditionalText {
        condition: String,
        body: Vec<TemplateNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Paragraph,
    IfDef,
    IfNotDef,
    ConditionalText,
}

impl Container {
    const ALL: [Container; 4] = [
        Container::Paragraph,
        Container::IfDef,
        Container::IfNotDef,
        Container::ConditionalText,
    ];

    fn name(self) -> &'static str {
        match self {
            Container::Paragraph => "Paragraph",
            Container::IfDef => "IfDef",
            Container::IfNotDef => "IfNotDef",
            Container::ConditionalText => "ConditionalText",
        }
    }
}

/// Value of `name="..."` inside a tag's attribute text.
fn attribute(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let mut search = 0;
    while let Some(pos) = attrs[search..].find(&needle) {
        let start = search + pos;
        // Skip partial matches such as `xkey="` when looking for `key`.
        let boundary = start == 0 || attrs[..start].ends_with(char::is_whitespace);
        let value_start = start + needle.len();
        if boundary {
            let end = attrs[value_start..].find('"')? + value_start;
            return Some(attrs[value_start..end].to_string());
        }
        search = value_start;
    }
    None
}

/// Does `rest` (text right after `<`) open the named tag?
fn opens(rest: &str, name: &str) -> bool {
    rest.strip_prefix(name)
        .and_then(|r| r.chars().next())
        .is_some_and(|c| c == '>' || c.is_whitespace())
}

/// Byte offset of the close tag matching an open tag whose body starts at
/// `from`, honouring nesting of the same tag.
fn matching_close(text: &str, from: usize, name: &str) -> Option<usize> {
    let close = format!("</{}>", name);
    let mut depth = 0usize;
    let mut i = from;
    while let Some(pos) = text[i..].find('<') {
        let at = i + pos;
        let rest = &text[at..];
        if rest.starts_with(&close) {
            if depth == 0 {
                return Some(at);
            }
            depth -= 1;
            i = at + close.len();
        } else {
            if opens(&rest[1..], name) {
                depth += 1;
            }
            i = at + 1;
        }
    }
    None
}

fn push_text(out: &mut Vec<TemplateNode>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(TemplateNode::Text(prev)) = out.last_mut() {
        prev.push_str(text);
    } else {
        out.push(TemplateNode::Text(text.to_string()));
    }
}

fn build_container(kind: Container, attrs: &str, body: &str) -> TemplateNode {
    match kind {
        Container::Paragraph => {
            // An AltParagraph inside a Paragraph is its fallback body.
            let alt_open = "<AltParagraph>";
            match body.find(alt_open) {
                Some(start) => {
                    let alt_from = start + alt_open.len();
                    let alt_end = matching_close(body, alt_from, "AltParagraph").unwrap_or(body.len());
                    let mut main = body[..start].to_string();
                    if let Some(tail) = body.get(alt_end + "</AltParagraph>".len()..) {
                        main.push_str(tail);
                    }
                    TemplateNode::Paragraph {
                        body: parse_template(&main),
                        alt: parse_template(&body[alt_from..alt_end]),
                    }
                }
                None => TemplateNode::Paragraph { body: parse_template(body), alt: Vec::new() },
            }
        }
        Container::IfDef => TemplateNode::IfDef {
            var: attribute(attrs, "var").unwrap_or_default(),
            body: parse_template(body),
        },
        Container::IfNotDef => TemplateNode::IfNotDef {
            var: attribute(attrs, "var").unwrap_or_default(),
            body: parse_template(body),
        },
        Container::ConditionalText => TemplateNode::ConditionalText {
            condition: attribute(attrs, "condition").unwrap_or_default(),
            body: parse_template(body),
        },
    }
}

/// Parse description text into a node list.
///
/// Unrecognised or unterminated tags degrade to literal text; parsing never
/// fails.
pub fn parse_template(text: &str) -> Vec<TemplateNode> {
    let mut out = Vec::new();
    let mut cursor = 0;

    while let Some(pos) = text[cursor..].find('<') {
        let tag_start = cursor + pos;
        push_text(&mut out, &text[cursor..tag_start]);
        let rest = &text[tag_start + 1..];

        if opens(rest, "Replace") {
            if let Some(end) = rest.find("/>") {
                let attrs = &rest["Replace".len()..end];
                out.push(TemplateNode::Replace {
                    key: attribute(attrs, "key").unwrap_or_default(),
                    default: attribute(attrs, "default"),
                    link: attribute(attrs, "link"),
                });
                cursor = tag_start + 1 + end + 2;
                continue;
            }
        }

        let mut consumed = false;
        for kind in Container::ALL {
            if !opens(rest, kind.name()) {
                continue;
            }
            let Some(gt) = rest.find('>') else { break };
            let attrs = &rest[kind.name().len()..gt];
            let body_start = tag_start + 1 + gt + 1;
            if let Some(close) = matching_close(text, body_start, kind.name()) {
                out.push(build_container(kind, attrs, &text[body_start..close]));
                cursor = close + kind.name().len() + 3;
                consumed = true;
            }
            break;
        }

        if !consumed {
            push_text(&mut out, "<");
            cursor = tag_start + 1;
        }
    }
    push_text(&mut out, &text[cursor..]);
    out
}

/// Strip one enclosing `<Content>` wrapper if present.
pub fn unwrap_content(text: &str) -> &str {
    let t = text.trim();
    t.strip_prefix("<Content>")
        .and_then(|r| r.strip_suffix("</Content>"))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> TemplateNode {
        TemplateNode::Text(s.to_string())
    }

    #[test]
    fn test_replace_tag() {
        let nodes = parse_template(r#"Call <Replace key="PrimaryCall.name" default="fn"/> here"#);
        assert_eq!(
            nodes,
            vec![
                text("Call "),
                TemplateNode::Replace { key: "PrimaryCall.name".into(), default: Some("fn".into()), link: None },
                text(" here"),
            ]
        );
    }

    #[test]
    fn test_paragraph_with_alt() {
        let nodes = parse_template(
            r#"<Paragraph>Uses <Replace key="a"/>.<AltParagraph>Generic text.</AltParagraph></Paragraph>"#,
        );
        match &nodes[0] {
            TemplateNode::Paragraph { body, alt } => {
                assert_eq!(body.len(), 3);
                assert_eq!(alt, &vec![text("Generic text.")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nested_same_tag_is_balanced() {
        let nodes = parse_template(r#"<IfDef var="a">x<IfDef var="b">y</IfDef>z</IfDef>!"#);
        assert_eq!(nodes.len(), 2);
        match &nodes[0] {
            TemplateNode::IfDef { var, body } => {
                assert_eq!(var, "a");
                assert_eq!(body.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(nodes[1], text("!"));
    }

    #[test]
    fn test_unknown_and_unterminated_tags_are_literal() {
        assert_eq!(parse_template("a <b>bold</b> c"), vec![text("a <b>bold</b> c")]);
        assert_eq!(parse_template(r#"<IfDef var="x">never closed"#), vec![text(r#"<IfDef var="x">never closed"#)]);
        assert_eq!(parse_template("1 < 2"), vec![text("1 < 2")]);
    }

    #[test]
    fn test_conditional_text_attribute() {
        match &parse_template(r#"<ConditionalText condition="java">J</ConditionalText>"#)[0] {
            TemplateNode::ConditionalText { condition, .. } => assert_eq!(condition, "java"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unwrap_content() {
        assert_eq!(unwrap_content("<Content>Body</Content>"), "Body");
        assert_eq!(unwrap_content("Plain"), "Plain");
    }
}
