#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const APP_JAVA: &str = "package demo;\nclass App {\n  void run(String q) {\n    stmt.execute(q);\n  }\n}\n";

pub const SOURCE_INDEX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<properties><entry key="src/App.java">src-archive/0.java</entry></properties>"#;

/// One finding in a generated dataflow document.
pub struct Finding {
    pub id: &'static str,
    pub vuln_type: &'static str,
    pub impact: f64,
    pub accuracy: f64,
    pub confidence: f64,
    pub probability: f64,
}

impl Finding {
    /// Impact 5 and likelihood 4, i.e. Critical.
    pub fn critical(id: &'static str, vuln_type: &'static str) -> Self {
        Self { id, vuln_type, impact: 5.0, accuracy: 5.0, confidence: 5.0, probability: 4.0 }
    }

    /// Impact 1 and likelihood 0.8, i.e. Low.
    pub fn low(id: &'static str, vuln_type: &'static str) -> Self {
        Self { id, vuln_type, impact: 1.0, accuracy: 2.0, confidence: 2.0, probability: 5.0 }
    }
}

/// A dataflow document with one trace per finding into `src/App.java`.
pub fn fvdl(findings: &[Finding]) -> String {
    let mut vulns = String::new();
    for f in findings {
        vulns.push_str(&format!(
            r#"<Vulnerability>
  <ClassInfo><ClassID>RULE-{id}</ClassID><Kingdom>Input Validation and Representation</Kingdom><Type>{ty}</Type><AnalyzerName>dataflow</AnalyzerName><DefaultSeverity>4.0</DefaultSeverity></ClassInfo>
  <InstanceInfo><InstanceID>{id}</InstanceID><InstanceSeverity>4.0</InstanceSeverity><Confidence>{conf}</Confidence>
    <MetaInfo><Group name="Accuracy">{acc}</Group><Group name="Impact">{imp}</Group><Group name="Probability">{prob}</Group></MetaInfo>
  </InstanceInfo>
  <AnalysisInfo><Unified>
    <Context><Function name="run"/></Context>
    <Trace><Primary>
      <Entry><NodeRef id="1"/></Entry>
      <Entry><Node><SourceLocation path="src/App.java" line="4"/><Action type="InCall">execute(0)</Action></Node></Entry>
    </Primary></Trace>
  </Unified></AnalysisInfo>
</Vulnerability>
"#,
            id = f.id,
            ty = f.vuln_type,
            conf = f.confidence,
            acc = f.accuracy,
            imp = f.impact,
            prob = f.probability,
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<FVDL xmlns="xmlns://www.fortifysoftware.com/schema/fvdl">
<UUID>d2b1-test</UUID>
<Build><BuildID>demo-build</BuildID><NumberFiles>1</NumberFiles></Build>
<Vulnerabilities>
{vulns}</Vulnerabilities>
<UnifiedNodePool>
  <Node id="1"><SourceLocation path="src/App.java" line="3"/><Action type="Read">q</Action>
    <Reason><TraceRef id="7"/></Reason></Node>
  <Node id="2"><SourceLocation path="src/App.java" line="2"/><Reason><TraceRef id="7"/></Reason></Node>
</UnifiedNodePool>
<UnifiedTracePool>
  <Trace id="7"><Primary><Entry><NodeRef id="2"/></Entry></Primary></Trace>
</UnifiedTracePool>
</FVDL>"#
    )
}

/// Audit document recording a single analysis value for `instance_id`.
pub fn audit_xml(instance_id: &str, analysis: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns2:Audit xmlns:ns2="xmlns://www.fortify.com/schema/audit" version="4.3">
  <ns2:IssueList>
    <ns2:Issue instanceId="{instance_id}" suppressed="false" revision="0">
      <ns2:Tag id="87f2364f-dcd4-49e6-861d-f8d3f351686b"><ns2:Value>{analysis}</ns2:Value></ns2:Tag>
    </ns2:Issue>
  </ns2:IssueList>
</ns2:Audit>"#
    )
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// An FPR in a fresh temp dir with the given findings, source snapshot and
/// any extra entries.
pub fn fpr(findings: &[Finding], extra: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.fpr");
    let doc = fvdl(findings);
    let mut entries: Vec<(&str, &str)> = vec![
        ("audit.fvdl", doc.as_str()),
        ("src-archive/index.xml", SOURCE_INDEX),
        ("src-archive/0.java", APP_JAVA),
    ];
    entries.extend_from_slice(extra);
    write_zip(&path, &entries);
    (dir, path)
}
