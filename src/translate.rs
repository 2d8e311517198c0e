//! Textual normalization of raw Karel 99 sources.
//!
//! `.K99` files are written in ISO-8859-2 with Czech keywords. Before any
//! structural parsing happens, every line is rewritten to the canonical
//! English keyword set by literal substring replacement. The translation is
//! stateless and cannot fail; text that matches no alias passes through.

use crate::parse::LoadError;

/// Czech keyword and header-marker aliases, applied in this order. Canonical
/// replacements never collide with alias keys, so the order only matters for
/// matching the reference table.
const ALIASES: &[(&str, &str)] = &[
    ("KROK", "STEP"),
    ("VLEVO-VBOK", "LEFT"),
    ("ZVEDNI", "PICK"),
    ("POLOŽ", "PLACE"),
    ("OPAKUJ", "REPEAT"),
    ("KRÁT", "TIMES"),
    ("DOKUD", "UNTIL"),
    ("KDYŽ", "IF"),
    ("JINAK", "ELSE"),
    ("JE", "IS"),
    ("NENÍ", "ISNOT"),
    ("ZEĎ", "WALL"),
    ("ZNAČKA", "FLAG"),
    ("DOMOV", "HOME"),
    ("SEVER", "NORTH"),
    ("JIH", "SOUTH"),
    ("ZÁPAD", "WEST"),
    ("VÝCHOD", "EAST"),
    ("KONEC", "END"),
    ("Velikost města", "Map size"),
    ("Pozice Karla", "Karel position"),
    ("Otočení Karla", "Karel rotation"),
    ("Umístění domova", "Home position"),
    ("Definice města", "Map definition"),
    ("VYTISKNI", "PRINT"),
];

/// Decode raw file bytes. The format predates Unicode; files are ISO-8859-2,
/// with bytes 0x80..=0x9F decoding to C1 controls that [`translate_line`]
/// patches up afterwards.
pub fn decode(bytes: &[u8]) -> Result<String, LoadError> {
    let (text, _, had_errors) = encoding_rs::ISO_8859_2.decode(bytes);
    if had_errors {
        return Err(LoadError::Encoding);
    }
    Ok(text.into_owned())
}

/// Rewrite one raw line to canonical keywords.
///
/// Drops line endings and tabs, maps the two legacy byte artifacts U+008E and
/// U+009E back to the accented letters they stood for in CP852-era files, and
/// then substitutes every alias table entry.
pub fn translate_line(line: &str) -> String {
    let mut out = line
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .replace('\t', "")
        .replace('\u{8e}', "Ž")
        .replace('\u{9e}', "ž");
    for (alias, canonical) in ALIASES {
        if out.contains(alias) {
            out = out.replace(alias, canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords() {
        assert_eq!(translate_line("KROK"), "STEP");
        assert_eq!(translate_line("   OPAKUJ 3-KRÁT"), "   REPEAT 3-TIMES");
        assert_eq!(translate_line("DOKUD NENÍ ZEĎ"), "UNTIL ISNOT WALL");
        assert_eq!(translate_line("KDYŽ JE ZNAČKA"), "IF IS FLAG");
        assert_eq!(translate_line("KONEC, JINAK"), "END, ELSE");
        assert_eq!(translate_line("VYTISKNI ahoj"), "PRINT ahoj");
    }

    #[test]
    fn header_markers() {
        assert_eq!(translate_line("Velikost města: 20, 20"), "Map size: 20, 20");
        assert_eq!(
            translate_line("Umístění domova: 1, 20"),
            "Home position: 1, 20"
        );
    }

    #[test]
    fn untranslated_text_passes_through() {
        assert_eq!(translate_line("MY-ROUTINE"), "MY-ROUTINE");
        assert_eq!(translate_line(".X.X."), ".X.X.");
    }

    #[test]
    fn line_endings_and_tabs_are_dropped() {
        assert_eq!(translate_line("KROK\r\n"), "STEP");
        assert_eq!(translate_line("\tKROK\t"), "STEP");
    }

    #[test]
    fn legacy_bytes_become_accented_letters() {
        // "POLOŽ" saved under a CP852-era code page and decoded as ISO-8859-2
        // arrives as POLO + U+008E.
        let decoded = decode(b"POLO\x8e\n").unwrap();
        assert_eq!(translate_line(&decoded), "PLACE");
        let decoded = decode(b"polo\x9eeno").unwrap();
        assert_eq!(translate_line(&decoded), "položeno");
    }
}
