use tracing::trace;

use crate::fvdl::ReplacementData;
use super::markup::strip_tags;
use super::template::{parse_template, unwrap_content, TemplateNode};

/// What a template may ask about the finding it is rendered for.
pub trait RenderContext {
    /// Variable present in the finding's knowledge map.
    fn has_variable(&self, name: &str) -> bool;

    /// Free text found anywhere in the finding's searchable fields.
    fn contains_text(&self, needle: &str) -> bool;
}

/// A substitution had no value while rendering a paragraph strictly.
#[derive(Debug)]
struct MissingReplacement;

pub struct DescriptionRenderer<'a> {
    ctx: &'a dyn RenderContext,
    data: &'a ReplacementData,
}

impl<'a> DescriptionRenderer<'a> {
    pub fn new(ctx: &'a dyn RenderContext, data: &'a ReplacementData) -> Self {
        Self { ctx, data }
    }

    /// Render raw description text and reduce it to plain text.
    pub fn render_plain(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }
        strip_tags(&self.render(raw))
    }

    /// Render raw description text, leaving formatting markup in place.
    pub fn render(&self, raw: &str) -> String {
        let nodes = parse_template(unwrap_content(raw));
        match self.render_nodes(&nodes, false) {
            Ok(s) => s.trim().to_string(),
            Err(MissingReplacement) => String::new(),
        }
    }

    fn defined(&self, var: &str) -> bool {
        !var.is_empty() && (self.ctx.has_variable(var) || self.data.contains_key(var))
    }

    fn render_nodes(&self, nodes: &[TemplateNode], strict: bool) -> Result<String, MissingReplacement> {
        let mut out = String::new();
        for node in nodes {
            out.push_str(&self.render_node(node, strict)?);
        }
        Ok(out)
    }

    fn render_node(&self, node: &TemplateNode, strict: bool) -> Result<String, MissingReplacement> {
        match node {
            TemplateNode::Text(t) => Ok(t.clone()),
            TemplateNode::Replace { key, default, link } => {
                self.substitute(key, default.as_deref(), link.is_some(), strict)
            }
            TemplateNode::Paragraph { body, alt } => match self.render_nodes(body, true) {
                Ok(s) => Ok(s),
                Err(MissingReplacement) => {
                    trace!("Paragraph substitution missing, using alternate text");
                    self.render_nodes(alt, false)
                }
            },
            TemplateNode::IfDef { var, body } => {
                if self.defined(var) {
                    self.render_nodes(body, strict)
                } else {
                    Ok(String::new())
                }
            }
            TemplateNode::IfNotDef { var, body } => {
                if self.defined(var) {
                    Ok(String::new())
                } else {
                    self.render_nodes(body, strict)
                }
            }
            TemplateNode::ConditionalText { condition, body } => {
                if !condition.is_empty() && self.ctx.contains_text(condition) {
                    self.render_nodes(body, strict)
                } else {
                    Ok(String::new())
                }
            }
        }
    }

    /// Value defs win over location defs, which win over the tag default.
    fn substitute(
        &self,
        key: &str,
        default: Option<&str>,
        link: bool,
        strict: bool,
    ) -> Result<String, MissingReplacement> {
        if let Some(def) = self.data.values.get(key) {
            return Ok(match (&def.location, link) {
                (Some(loc), true) => format!("{} (in {} at line {})", def.value, loc.path, loc.line),
                _ => def.value.clone(),
            });
        }
        if let Some(loc) = self.data.locations.get(key) {
            let display = default.unwrap_or(&loc.path);
            return Ok(if link {
                format!("{} (at line {})", display, loc.line)
            } else {
                display.to_string()
            });
        }
        if let Some(d) = default {
            return Ok(d.to_string());
        }
        if strict {
            Err(MissingReplacement)
        } else {
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::fvdl::{LocationDef, ReplacementDef, SourceLocation};

    struct Ctx {
        vars: Vec<&'static str>,
        text: &'static str,
    }

    impl RenderContext for Ctx {
        fn has_variable(&self, name: &str) -> bool {
            self.vars.contains(&name)
        }
        fn contains_text(&self, needle: &str) -> bool {
            self.text.to_lowercase().contains(&needle.to_lowercase())
        }
    }

    fn data() -> ReplacementData {
        let mut values = BTreeMap::new();
        values.insert(
            "PrimaryCall.name".to_string(),
            ReplacementDef {
                value: "executeQuery".into(),
                location: Some(SourceLocation { path: "Dao.java".into(), line: 12, ..Default::default() }),
            },
        );
        let mut locations = BTreeMap::new();
        locations.insert(
            "PrimaryLocation".to_string(),
            LocationDef { path: "Dao.java".into(), line: 12, col_start: 0, col_end: 0 },
        );
        ReplacementData { values, locations }
    }

    fn ctx() -> Ctx {
        Ctx { vars: vec!["SinkKnown"], text: "Java SQL Injection" }
    }

    #[test]
    fn test_substitution_precedence() {
        let d = data();
        let c = ctx();
        let r = DescriptionRenderer::new(&c, &d);
        assert_eq!(r.render(r#"<Replace key="PrimaryCall.name" default="x"/>"#), "executeQuery");
        assert_eq!(r.render(r#"<Replace key="PrimaryCall.name" link="y"/>"#), "executeQuery (in Dao.java at line 12)");
        assert_eq!(r.render(r#"<Replace key="PrimaryLocation"/>"#), "Dao.java");
        assert_eq!(r.render(r#"<Replace key="PrimaryLocation" default="here" link="y"/>"#), "here (at line 12)");
        assert_eq!(r.render(r#"[<Replace key="Nope" default="dflt"/>]"#), "[dflt]");
        assert_eq!(r.render(r#"[<Replace key="Nope"/>]"#), "[]");
    }

    #[test]
    fn test_paragraph_falls_back_to_alt() {
        let d = data();
        let c = ctx();
        let r = DescriptionRenderer::new(&c, &d);
        let tpl = r#"<Paragraph>Missing <Replace key="Nope"/>.<AltParagraph>Fallback <Replace key="AlsoNope"/>ok</AltParagraph></Paragraph>"#;
        assert_eq!(r.render(tpl), "Fallback ok");
        let tpl = r#"<Paragraph>Found <Replace key="PrimaryCall.name"/>.<AltParagraph>Fallback</AltParagraph></Paragraph>"#;
        assert_eq!(r.render(tpl), "Found executeQuery.");
    }

    #[test]
    fn test_conditionals() {
        let d = data();
        let c = ctx();
        let r = DescriptionRenderer::new(&c, &d);
        assert_eq!(r.render(r#"<IfDef var="SinkKnown">A</IfDef><IfDef var="Other">B</IfDef>"#), "A");
        assert_eq!(r.render(r#"<IfDef var="PrimaryCall.name">R</IfDef>"#), "R");
        assert_eq!(r.render(r#"<IfNotDef var="Other">C</IfNotDef><IfNotDef var="SinkKnown">D</IfNotDef>"#), "C");
        assert_eq!(
            r.render(r#"<ConditionalText condition="sql injection">E</ConditionalText><ConditionalText condition="xss">F</ConditionalText>"#),
            "E"
        );
    }

    #[test]
    fn test_render_plain_strips_markup_and_content_wrapper() {
        let d = data();
        let c = ctx();
        let r = DescriptionRenderer::new(&c, &d);
        let raw = r#"<Content><Paragraph>Calling <code><Replace key="PrimaryCall.name"/></code> is <b>bad</b>.</Paragraph></Content>"#;
        assert_eq!(r.render_plain(raw), "Calling executeQuery is bad.");
        assert_eq!(r.render_plain("   "), "");
    }
}
