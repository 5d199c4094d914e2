mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::{Post, User, fixture};
use restmap::{
    Converter, Document, DocumentParser, HttpResponse, Instantiator, LazyCollection, Mapped,
    MappingError, Representation, Schema, Value, XmlParser, collection_items, materialize,
    materialize_many,
};

fn posts() -> Vec<Post> {
    let response = HttpResponse::new(200, "http://test.net/users/1/posts.xml").with_body(fixture("user_posts"));
    let collection = LazyCollection::new(response, Arc::new(XmlParser), Instantiator::<Post>::mapped());
    collection.into_vec().unwrap()
}

#[test]
fn test_collection_has_the_right_size() {
    assert_eq!(posts().len(), 1);
}

#[test]
fn test_post_fields_are_renamed_and_converted() {
    let post = &posts()[0];

    assert_eq!(post.body.as_deref(), Some("How is everybody today?"));
    assert_eq!(post.id, 1);
    assert_eq!(post.user_id, Some(1));
    assert_eq!(post.parent_id, None);
    assert_eq!(post.created_at, NaiveDate::from_ymd_opt(2011, 10, 26));
}

#[test]
fn test_nested_and_repeated_elements() {
    let post = &posts()[0];

    assert_eq!(
        post.user,
        Some(User {
            first_name: Some("John".to_string()),
            last_name: Some("Doe".to_string()),
        })
    );
    assert_eq!(post.replies.len(), 2);

    let reply = &post.replies[0];
    assert_eq!(reply.id, 2);
    assert_eq!(reply.user_id, Some(2));
    assert_eq!(reply.parent_id, Some(1));
    assert_eq!(reply.user.as_ref().and_then(|u| u.last_name.as_deref()), Some("Smith"));
    assert_eq!(reply.created_at, NaiveDate::from_ymd_opt(2011, 10, 27));
    assert!(reply.replies.is_empty());
}

#[test]
fn test_generic_representations_match_typed_objects() {
    let document = XmlParser.parse(&fixture("user_posts")).unwrap();
    let schema = Post::schema().unwrap();
    let items = collection_items(&document);
    let representations = materialize_many(&schema, &items).unwrap();

    let post = &representations[0];
    assert_eq!(post.schema_name(), "Post");
    assert_eq!(post.integer("id"), Some(1));
    assert_eq!(post.nested("user").and_then(|u| u.text("first_name")), Some("John"));
    assert_eq!(post.list("replies").len(), 2);
    assert_eq!(
        post.field_names().collect::<Vec<_>>(),
        vec!["id", "user_id", "parent_id", "created_at", "body", "user", "replies"]
    );
}

fn employee_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("Employee")
            .boolean(&["is_rockstar", "slacker", "fired"])
            .float(&["rating"])
            .string(&["nickname"])
            .build()
            .unwrap(),
    )
}

fn employee() -> Representation {
    let document = XmlParser.parse(&fixture("employee")).unwrap();
    materialize(&employee_schema(), document.root()).unwrap()
}

#[test]
fn test_boolean_true_reads_true() {
    let mut employee = employee();
    assert!(employee.boolean("is_rockstar"));
    assert!(employee.is_present("is_rockstar"));

    employee.set("is_rockstar", Some(Value::Boolean(false)));
    assert!(!employee.boolean("is_rockstar"));
    assert!(!employee.is_present("is_rockstar"));
}

#[test]
fn test_boolean_false_and_missing_read_false() {
    let employee = employee();
    assert!(!employee.boolean("slacker"));
    assert!(!employee.is_present("slacker"));
    assert!(!employee.boolean("fired"));
    assert!(!employee.is_present("fired"));
}

#[test]
fn test_float_and_empty_text() {
    let employee = employee();
    assert_eq!(employee.float("rating"), Some(7.8));
    assert_eq!(employee.text("nickname"), None);
    assert!(!employee.is_present("nickname"));
}

#[test]
fn test_malformed_number_surfaces_on_access() {
    let response = HttpResponse::new(200, "http://test.net/posts.xml")
        .with_body(r#"<posts type="array"><post><objectId>abc</objectId></post></posts>"#);
    let mut collection = LazyCollection::new(response, Arc::new(XmlParser), Instantiator::<Post>::mapped());

    match collection.as_slice() {
        Err(MappingError::Conversion(error)) => {
            assert_eq!(error.field, "id");
            assert_eq!(error.raw_text, "abc");
        }
        other => panic!("Expected conversion error, got {:?}", other.map(|p| p.len())),
    }
}

#[test]
fn test_custom_converter_and_explicit_selectors() {
    let schema = Arc::new(
        Schema::builder("Tagged")
            .attribute(
                "tags/tag[@primary='true']",
                "primary_tag",
                Converter::custom("upper", |_, node| {
                    Ok(Some(Value::Text(node.content().trim().to_uppercase())))
                }),
            )
            .element("authorObjectId", Converter::Integer)
            .build()
            .unwrap(),
    );
    let document = Document::parse_str(
        r#"<item>
             <authorObjectId>9</authorObjectId>
             <tags><tag>misc</tag><tag primary="true"> rust </tag></tags>
           </item>"#,
    )
    .unwrap();

    let item = materialize(&schema, document.root()).unwrap();
    assert_eq!(item.text("primary_tag"), Some("RUST"));
    assert_eq!(item.integer("author_id"), Some(9));
}
