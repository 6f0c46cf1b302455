// Internal entity declarations of a document type declaration, e.g.
//   <!ENTITY n "noun (common) (futsuumeishi)">
// JMdict uses these for all of its part-of-speech, misc and info codes.

use std::collections::HashMap;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, multispace0, multispace1},
    sequence::delimited,
};

pub type EntityTable = HashMap<String, String>;

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_until("\""), char('"')),
        delimited(char('\''), take_until("'"), char('\'')),
    ))
    .parse(input)
}

fn entity_decl(input: &str) -> IResult<&str, (&str, &str)> {
    (
        tag("<!ENTITY"),
        multispace1,
        take_while1(is_name_char),
        multispace1,
        quoted,
        multispace0,
        char('>'),
    )
        .map(|(_, _, name, _, value, _, _)| (name, value))
        .parse(input)
}

/// Collect the general entity declarations from the text of a DOCTYPE.
/// Parameter entities and other markup declarations are skipped.
pub fn parse_entity_declarations(doctype: &str) -> EntityTable {
    let mut entities = EntityTable::new();
    let mut rest = doctype;
    while let Some(pos) = rest.find("<!") {
        rest = &rest[pos..];
        if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map_or("", |end| &after[end + 3..]);
            continue;
        }
        match entity_decl(rest) {
            Ok((remaining, (name, value))) => {
                entities
                    .entry(name.to_owned())
                    .or_insert_with(|| value.to_owned());
                rest = remaining;
            }
            Err(_) => rest = &rest[2..],
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_decl() {
        let input = r#"<!ENTITY v1 "Ichidan verb"> rest"#;
        assert_eq!(entity_decl(input), Ok((" rest", ("v1", "Ichidan verb"))));
    }

    #[test]
    fn test_entity_decl_single_quotes() {
        let input = "<!ENTITY uk 'word usually written using kana alone'>";
        assert_eq!(
            entity_decl(input),
            Ok(("", ("uk", "word usually written using kana alone")))
        );
    }

    #[test]
    fn test_parse_declarations_skips_other_markup() {
        let doctype = r#"JMdict [
<!ELEMENT JMdict (entry*)>
<!-- <!ENTITY commented "ignored"> -->
<!ATTLIST gloss xml:lang CDATA "eng">
<!ENTITY % param "ignored">
<!ENTITY n "noun (common) (futsuumeishi)">
<!ENTITY adj-i "adjective (keiyoushi)">
]"#;
        let entities = parse_entity_declarations(doctype);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities["n"], "noun (common) (futsuumeishi)");
        assert_eq!(entities["adj-i"], "adjective (keiyoushi)");
    }

    #[test]
    fn test_first_declaration_wins() {
        let entities =
            parse_entity_declarations(r#"<!ENTITY a "first"><!ENTITY a "second">"#);
        assert_eq!(entities["a"], "first");
    }
}
