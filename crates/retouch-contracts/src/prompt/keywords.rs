/// Edit-intent words (English and German). Matching is a case-insensitive
/// substring test against the free text.
pub const EDIT_KEYWORDS: &[&str] = &[
    "edit",
    "change",
    "add",
    "remove",
    "make",
    "replace",
    "insert",
    "put",
    "apply",
    "transform",
    "adjust",
    "give",
    "enhance",
    "generate",
    "create",
    "convert",
    "style",
    "retouch",
    "retouching",
    "swap",
    "background",
    "bearbeiten",
    "ändern",
    "hinzufügen",
    "entfernen",
    "machen",
    "ersetzen",
    "einfügen",
    "anwenden",
    "transformieren",
    "anpassen",
    "geben",
    "verbessern",
    "generieren",
    "erstellen",
    "konvertieren",
    "stil",
    "retusche",
    "retuschieren",
    "austauschen",
    "hintergrund",
    "umgebung",
    "porträt",
    "nahaufnahme",
    "bild",
    "foto",
    "look",
    "farbe",
    "make-up",
    "makeup",
    "schwarzweiß",
    "monochrom",
    "filmkorn",
    "vignette",
    "szene",
];

pub fn mentions_edit_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    EDIT_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}
