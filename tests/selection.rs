use std::collections::BTreeSet;

use csv_enrich::{CsvError, Headers, Selection};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["id", "name", "date", "note"];

#[derive(Debug, Clone)]
enum Term {
    Position(usize),
    Range(usize, usize),
    OpenRange(usize),
    Name(usize),
    Occurrence(usize),
}

fn render(term: &Term, fieldnames: &[String]) -> String {
    match term {
        Term::Position(i) => (i + 1).to_string(),
        Term::Range(i, j) => format!("{}-{}", i + 1, j + 1),
        Term::OpenRange(i) => format!("{}-", i + 1),
        Term::Name(i) => fieldnames[*i].clone(),
        Term::Occurrence(i) => {
            let name = &fieldnames[*i];
            let occurrence = fieldnames[..*i].iter().filter(|n| *n == name).count();
            format!("{name}[{occurrence}]")
        }
    }
}

fn is_positional(term: &Term) -> bool {
    matches!(term, Term::Position(_) | Term::Range(..) | Term::OpenRange(_))
}

fn term(len: usize) -> impl Strategy<Value = Term> {
    prop_oneof![
        (0..len).prop_map(Term::Position),
        (0..len, 0..len).prop_map(|(i, j)| Term::Range(i, j)),
        (0..len).prop_map(Term::OpenRange),
        (0..len).prop_map(Term::Name),
        (0..len).prop_map(Term::Occurrence),
    ]
}

fn case() -> impl Strategy<Value = (Vec<String>, Vec<Term>)> {
    (1usize..8).prop_flat_map(|len| {
        (
            prop::collection::vec(prop::sample::select(NAMES.to_vec()), len)
                .prop_map(|names| names.into_iter().map(str::to_string).collect::<Vec<_>>()),
            prop::collection::vec(term(len), 1..5),
        )
    })
}

proptest! {
    #[test]
    fn selections_are_deterministic_and_in_bounds((fieldnames, terms) in case()) {
        let headers = Headers::new(fieldnames.iter().cloned());
        let selection = terms.iter().map(|t| render(t, &fieldnames)).collect::<Vec<_>>().join(",");
        let first = headers.select(&selection).unwrap();
        let second = headers.select(&selection).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(!first.is_empty());
        prop_assert!(first.iter().all(|idx| *idx < fieldnames.len()));
    }

    #[test]
    fn inversion_is_the_sorted_complement((fieldnames, terms) in case()) {
        let headers = Headers::new(fieldnames.iter().cloned());
        let selection = terms.iter().map(|t| render(t, &fieldnames)).collect::<Vec<_>>().join(",");
        let picked: BTreeSet<usize> = headers.select(&selection).unwrap().into_iter().collect();
        let inverted = headers.select(&format!("!{selection}")).unwrap();
        let expected: Vec<usize> = (0..fieldnames.len()).filter(|i| !picked.contains(i)).collect();
        prop_assert_eq!(inverted, expected);
    }

    #[test]
    fn positional_selections_ignore_headers((fieldnames, terms) in case()) {
        let terms: Vec<Term> = terms.into_iter().filter(is_positional).collect();
        prop_assume!(!terms.is_empty());
        let headers = Headers::new(fieldnames.iter().cloned());
        let selection = terms.iter().map(|t| render(t, &fieldnames)).collect::<Vec<_>>().join(",");
        prop_assert!(Selection::parse(&selection).unwrap().is_suitable_without_headers());
        prop_assert_eq!(
            headers.select(&selection).unwrap(),
            Headers::select_no_headers(fieldnames.len(), &selection).unwrap()
        );
    }
}

#[test]
fn names_resolve_to_their_first_occurrence() {
    let headers = Headers::new(["id", "name", "id", "date"]);
    assert_eq!(headers.select("id").unwrap(), vec![0]);
    assert_eq!(headers.select("id[1]").unwrap(), vec![2]);
    assert_eq!(headers.select("name-date").unwrap(), vec![1, 2, 3]);
    assert_eq!(headers.select("date-name").unwrap(), vec![3, 2, 1]);
    assert_eq!(headers.select("!id[0]").unwrap(), vec![1, 2, 3]);
}

#[test]
fn quoted_names_may_hold_separators() {
    let headers = Headers::new(["Date - Opening", "a,b", "x"]);
    assert_eq!(
        headers.select("\"Date - Opening\",\"a,b\"").unwrap(),
        vec![0, 1]
    );
    assert_eq!(headers.select("Date \\- Opening").unwrap(), vec![0]);
}

#[test]
fn malformed_selections_are_rejected() {
    let headers = Headers::new(["id", "name"]);
    for bad in ["", "!", "0", "id[x]", "id[0]-name", "\"open", "id,,name"] {
        assert!(
            matches!(headers.select(bad), Err(CsvError::SelectionSyntax { .. })),
            "{bad:?} should not parse"
        );
    }
    assert!(matches!(
        headers.select("email"),
        Err(CsvError::UnknownColumn { .. })
    ));
    assert!(matches!(
        headers.select("id[3]"),
        Err(CsvError::OccurrenceOutOfRange { .. })
    ));
    assert!(matches!(
        headers.select("3"),
        Err(CsvError::ColumnOutOfRange { .. })
    ));
    assert!(matches!(
        Headers::select_no_headers(2, "name"),
        Err(CsvError::HeadersRequired(_))
    ));
}
