use agora_api::{EntityId, Role, Store, StorePath, UserId, UserProfile};
use agora_client::SessionContext;
use agora_mock_server::MockStore;
use serde_json::{json, Map, Value};

#[cfg(test)]
mod scenarios;

pub fn init_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        // Several tests of the same binary may try
        let _ = tracing_subscriber::fmt::try_init();
    }
}

pub fn signed_in(uid: &str) -> SessionContext {
    SessionContext::signed_in(
        UserId::from(uid),
        UserProfile {
            username: String::from(uid),
            ..UserProfile::default()
        },
    )
}

pub fn superuser(uid: &str) -> SessionContext {
    SessionContext::signed_in(
        UserId::from(uid),
        UserProfile {
            username: String::from(uid),
            role: Role::Superuser,
            ..UserProfile::default()
        },
    )
}

fn like_map(likers: &[&str]) -> Value {
    Value::Object(
        likers
            .iter()
            .map(|u| (String::from(*u), Value::Bool(true)))
            .collect::<Map<_, _>>(),
    )
}

/// Writes a post and its category index entry the way the forum client does
pub async fn seed_post(
    store: &MockStore,
    category: &str,
    post: &str,
    author: &str,
    created_at: i64,
    likers: &[&str],
) {
    let id = EntityId::from(post);
    let record = json!({
        "id": post,
        "categoryId": category,
        "title": lipsum::lipsum_title(),
        "content": lipsum::lipsum(20),
        "author": { "uid": author, "username": author },
        "createdAt": created_at,
        "likes": like_map(likers),
    });
    store
        .write(&StorePath::post(&id), record)
        .await
        .expect("seeding post");
    store
        .write(
            &StorePath::category_entry(&EntityId::from(category), &id),
            Value::Bool(true),
        )
        .await
        .expect("seeding category index");
}

pub async fn seed_comment(store: &MockStore, post: &str, comment: &str, author: &str, created_at: i64) {
    let (post, comment) = (EntityId::from(post), EntityId::from(comment));
    let record = json!({
        "postId": post.as_str(),
        "content": lipsum::lipsum_words(8),
        "author": { "uid": author, "username": author },
        "createdAt": created_at,
    });
    store
        .write(&StorePath::comment(&post, &comment), record)
        .await
        .expect("seeding comment");
    store
        .write(&StorePath::comment_entry(&post, &comment), Value::Bool(true))
        .await
        .expect("seeding comment index");
}
