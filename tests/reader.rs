mod common;

use std::io::Cursor;

use common::{TestWorkspace, fixture, fixture_path, row};
use csv_enrich::{
    CsvError, Multiplex, NullBytes, Projected, Reader, ReaderBuilder, Template,
};

#[test]
fn reads_headers_and_rows() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).expect("open people");
    assert_eq!(reader.fieldnames().unwrap(), &["name", "surname", "age"]);
    assert_eq!(reader.row_len(), 3);
    assert!(!reader.is_empty());

    let rows: Vec<Vec<String>> = reader.by_ref().map(|r| r.expect("row")).collect();
    assert_eq!(
        rows,
        vec![
            row(&["John", "Matthews", "45"]),
            row(&["Mary", "Sue", "32"]),
            row(&["Julia", "Stone", "28"]),
        ]
    );
}

#[test]
fn cells_by_name_index_and_occurrence() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let surnames: Vec<String> = reader.cells("surname").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(surnames, vec!["Matthews", "Sue", "Stone"]);

    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let ages: Vec<String> = reader.cells(2usize).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(ages, vec!["45", "32", "28"]);

    let mut reader = Reader::from_rows(vec![
        vec!["x", "y", "x"],
        vec!["1", "2", "3"],
        vec!["4", "5", "6"],
    ])
    .unwrap();
    let second_x: Vec<String> = reader.cells(("x", 1usize)).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(second_x, vec!["3", "6"]);
}

#[test]
fn cells_with_rows_pairs_each_cell_with_its_row() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let pairs: Vec<(Vec<String>, String)> = reader
        .cells_with_rows("name")
        .unwrap()
        .map(|p| p.unwrap())
        .collect();
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[1].1, "Mary");
    assert_eq!(pairs[1].0, row(&["Mary", "Sue", "32"]));
}

#[test]
fn unknown_column_is_reported_as_missing() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    match reader.cells("email") {
        Err(CsvError::MissingColumn { column }) => assert_eq!(column, "email"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn headerless_sources_keep_their_first_row() {
    let mut reader = ReaderBuilder::new()
        .no_headers(true)
        .from_path(fixture_path("people.csv"))
        .unwrap();
    assert!(reader.fieldnames().is_none());
    assert!(matches!(
        reader.column_index("name"),
        Err(CsvError::HeadersRequired(_))
    ));
    let names: Vec<String> = reader.cells(0usize).unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(names, vec!["name", "John", "Mary", "Julia"]);
}

#[test]
fn delimiter_comes_from_extension_or_sniffing() {
    let tsv = Reader::from_path(fixture_path("people.tsv")).unwrap();
    assert_eq!(tsv.delimiter(), b'\t');
    assert_eq!(tsv.fieldnames().unwrap().len(), 3);

    let mut sniffed = Reader::from_path(fixture_path("people_semicolons.txt")).unwrap();
    assert_eq!(sniffed.delimiter(), b';');
    assert_eq!(sniffed.next().unwrap().unwrap(), row(&["John", "Matthews", "45"]));
}

#[test]
fn gzip_files_are_decompressed() {
    let workspace = TestWorkspace::new();
    let path = workspace.write_gz("people.csv.gz", &fixture("people.csv"));
    let mut reader = Reader::from_path(&path).unwrap();
    assert_eq!(reader.delimiter(), b',');
    let names: Vec<String> = reader.cells("name").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(names, vec!["John", "Mary", "Julia"]);
}

#[test]
fn empty_and_header_only_files() {
    assert!(matches!(
        Reader::from_path(fixture_path("empty.csv")),
        Err(CsvError::EmptyFile)
    ));
    let mut reader = Reader::from_path(fixture_path("empty_with_headers.csv")).unwrap();
    assert!(reader.is_empty());
    assert_eq!(reader.fieldnames().unwrap().len(), 3);
    assert!(reader.next().is_none());
}

#[test]
fn byte_order_mark_is_skipped() {
    let workspace = TestWorkspace::new();
    let path = workspace.write_bytes("bom.csv", b"\xEF\xBB\xBFname,age\nJohn,45\n");
    let reader = Reader::from_path(&path).unwrap();
    assert_eq!(reader.fieldnames().unwrap(), &["name", "age"]);
}

#[test]
fn multiplexing_splits_one_row_per_value() {
    let mut reader = ReaderBuilder::new()
        .multiplex(Multiplex::new("colors", "|"))
        .from_path(fixture_path("colors.csv"))
        .unwrap();
    assert_eq!(reader.fieldnames().unwrap(), &["name", "colors"]);
    let rows: Vec<Vec<String>> = reader.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(
        rows,
        vec![
            row(&["John", "blue"]),
            row(&["Mary", "yellow"]),
            row(&["Mary", "red"]),
            row(&["Julia", ""]),
            row(&["Jack", "green"]),
            row(&["Jack", "blue"]),
            row(&["Jack", "orange"]),
        ]
    );
}

#[test]
fn multiplexed_column_can_be_renamed() {
    let mut reader = ReaderBuilder::new()
        .multiplex(Multiplex::new("colors", "|").rename("color"))
        .from_path(fixture_path("colors.csv"))
        .unwrap();
    assert_eq!(reader.fieldnames().unwrap(), &["name", "color"]);
    let colors: Vec<String> = reader.cells("color").unwrap().map(|c| c.unwrap()).collect();
    assert_eq!(colors.len(), 7);
}

#[test]
fn multiplexing_an_unknown_column_fails() {
    let result = ReaderBuilder::new()
        .multiplex(Multiplex::new("colours", "|"))
        .from_path(fixture_path("colors.csv"));
    assert!(matches!(result, Err(CsvError::MissingColumn { .. })));
}

#[test]
fn prebuffering_reports_total_when_everything_fits() {
    let reader = ReaderBuilder::new()
        .prebuffer_bytes(Some(1024))
        .multiplex(Multiplex::new("colors", "|"))
        .from_path(fixture_path("colors.csv"))
        .unwrap();
    assert_eq!(reader.total(), Some(7));

    let mut reader = ReaderBuilder::new()
        .prebuffer_bytes(Some(2))
        .from_path(fixture_path("colors.csv"))
        .unwrap();
    assert_eq!(reader.total(), None);
    assert_eq!(reader.by_ref().count(), 4);

    let reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    assert_eq!(reader.total(), None);
}

#[test]
fn iteration_can_stop_and_continue() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let first: Vec<Vec<String>> = reader.by_ref().take(1).map(|r| r.unwrap()).collect();
    assert_eq!(first, vec![row(&["John", "Matthews", "45"])]);
    let rest: Vec<Vec<String>> = reader.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0][0], "Mary");
    assert!(reader.next().is_none());
}

#[test]
fn counting_rows() {
    let path = fixture_path("people.csv");
    assert_eq!(Reader::count(&path, None).unwrap(), Some(3));
    assert_eq!(Reader::count(&path, Some(3)).unwrap(), Some(3));
    assert_eq!(Reader::count(&path, Some(2)).unwrap(), None);
    assert_eq!(
        ReaderBuilder::new().no_headers(true).count(&path, None).unwrap(),
        Some(4)
    );
    assert_eq!(
        Reader::count(fixture_path("empty_with_headers.csv"), None).unwrap(),
        Some(0)
    );

    let workspace = TestWorkspace::new();
    let gz = workspace.write_gz("people.csv.gz", &fixture("people.csv"));
    assert_eq!(Reader::count(&gz, None).unwrap(), Some(3));
}

#[test]
fn rows_of_the_wrong_length_stop_iteration() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("ragged.csv", "a,b\n1,2\n3,4,5\n6,7\n");
    let mut reader = Reader::from_path(&path).unwrap();
    assert!(reader.next().unwrap().is_ok());
    assert!(matches!(
        reader.next(),
        Some(Err(CsvError::RowLengthMismatch {
            expected: 2,
            actual: 3
        }))
    ));
    assert!(reader.next().is_none());
}

#[test]
fn null_byte_policies_on_read() {
    let workspace = TestWorkspace::new();
    let path = workspace.write_bytes("nul.csv", b"name,note\nJo\0hn,ok\n");

    let mut kept = Reader::from_path(&path).unwrap();
    assert_eq!(kept.next().unwrap().unwrap()[0], "Jo\0hn");

    let mut stripped = ReaderBuilder::new()
        .null_bytes(NullBytes::Strip)
        .from_path(&path)
        .unwrap();
    assert_eq!(stripped.next().unwrap().unwrap()[0], "John");

    let rejected = ReaderBuilder::new()
        .null_bytes(NullBytes::Reject)
        .from_path(&path);
    assert!(matches!(rejected, Err(CsvError::NullByte { column: 0 })));
}

#[test]
fn latin1_input_is_decoded() {
    let workspace = TestWorkspace::new();
    let path = workspace.write_bytes("latin1.csv", b"name\nJos\xe9\n");
    assert!(Reader::from_path(&path).is_err());

    let mut reader = ReaderBuilder::new()
        .encoding(encoding_rs::WINDOWS_1252)
        .from_path(&path)
        .unwrap();
    assert_eq!(reader.next().unwrap().unwrap(), row(&["José"]));
}

#[test]
fn in_memory_sources() {
    // No extension to learn from: comma is assumed.
    let reader = Reader::from_reader(Cursor::new(b"a|b\n1|2\n".to_vec())).unwrap();
    assert_eq!(reader.row_len(), 1);

    let mut reader = ReaderBuilder::new()
        .delimiter(b'|')
        .from_reader(Cursor::new(b"a|b\n1|2\n".to_vec()))
        .unwrap();
    assert_eq!(reader.next().unwrap().unwrap(), row(&["1", "2"]));
}

#[test]
fn records_project_rows_through_a_template() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let template = Template::record([
        ("who", Template::tuple(["name", "surname"])),
        ("age", Template::column("age")),
    ]);
    let records: Vec<Projected> = reader
        .records(&template)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(
        records[0],
        Projected::Record(vec![
            (
                "who".to_string(),
                Projected::Tuple(vec!["John".into(), "Matthews".into()])
            ),
            ("age".to_string(), "45".into()),
        ])
    );
    assert_eq!(records[2].flatten(), vec!["Julia", "Stone", "28"]);
}

#[test]
fn rows_can_be_wrapped_for_named_access() {
    let mut reader = Reader::from_path(fixture_path("people.csv")).unwrap();
    let first = reader.next().unwrap().unwrap();
    let view = reader.wrap(&first).unwrap();
    assert_eq!(&view["surname"], "Matthews");
    assert_eq!(view.get("age"), Some("45"));
    assert_eq!(view.get("email"), None);
    assert_eq!(&view[0], "John");
}
