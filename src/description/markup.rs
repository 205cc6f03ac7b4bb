/// Formatting tokens rewritten to their plain-text form, applied in order.
const REWRITES: &[(&str, &str)] = &[
    ("<pre>", "<code>"),
    ("</pre>", "</code>"),
    ("<p>", ""),
    ("</p>", "\n"),
    ("<table>", ""),
    ("</table>", ""),
    ("<tr>", ""),
    ("</tr>", ""),
    ("<td>", "\t"),
    ("</td>", ""),
    ("<th>", "<b>\t"),
    ("</th>", "</b>"),
    ("<li>", "-"),
    ("</li>", ""),
    ("<blockquote>", ""),
    ("</blockquote>", ""),
    ("\u{a0}", " "),
    ("<b>", ""),
    ("</b>", ""),
    ("<code>", ""),
    ("</code>", ""),
    ("<h1>", ""),
    ("</h1>", ""),
    ("<ul>", ""),
    ("</ul>", ""),
];

/// Reduce rendered description markup to plain text and trim it.
pub fn strip_tags(text: &str) -> String {
    let mut out = text.to_string();
    for (from, to) in REWRITES {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out.trim().to_string()
}
