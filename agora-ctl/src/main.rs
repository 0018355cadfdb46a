use std::path::{Path, PathBuf};

use agora_client::{
    api::{CollectionKey, EntityId, UserId},
    ForumClient, SessionContext,
};
use agora_mock_server::MockStore;
use anyhow::Context;

#[derive(structopt::StructOpt)]
struct Opt {
    /// JSON file holding the whole store, created if missing
    #[structopt(short, long, env = "AGORA_STORE", parse(from_os_str))]
    store: PathBuf,

    /// Acting user id
    #[structopt(short, long, env = "AGORA_USER")]
    user: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// List the posts, or show one post with its comments and replies
    Show {
        /// Post id
        post: Option<String>,
    },

    /// Create a post
    Post {
        /// Category id
        category: String,
        title: String,
        content: String,
    },

    /// Comment on a post
    Comment {
        /// Post id
        post: String,
        content: String,
    },

    /// Reply to a comment
    Reply {
        /// Post id
        post: String,

        /// Comment id
        comment: String,

        content: String,
    },

    /// Like or unlike a post, or one of its comments
    Like {
        /// Post id
        post: String,

        /// Comment id
        #[structopt(long)]
        comment: Option<String>,
    },
}

fn load(path: &Path) -> anyhow::Result<MockStore> {
    if !path.exists() {
        return Ok(MockStore::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading store file {:?}", path))?;
    let root = serde_json::from_str(&data)
        .with_context(|| format!("parsing store file {:?}", path))?;
    Ok(MockStore::import(root))
}

fn save(path: &Path, store: &MockStore) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(&store.export()).context("serializing store")?;
    std::fs::write(path, data).with_context(|| format!("writing store file {:?}", path))
}

fn print_post(client: &ForumClient<MockStore>, post: &EntityId) {
    for c in client.comments_for(post) {
        println!(
            "  [{}] {}: {} ({} likes)",
            c.id,
            c.author.display_name,
            c.content,
            c.like_count()
        );
        for r in client.replies_for(&c.id) {
            println!(
                "    [{}] {}: {} ({} likes)",
                r.id,
                r.author.display_name,
                r.content,
                r.like_count()
            );
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let store = load(&opt.store)?;
    let mut session = SessionContext::new();
    if let Some(user) = opt.user {
        session.sign_in(&store, UserId(user)).await;
    }
    execute(&opt.store, store, &session, opt.cmd).await
}

/// Runs `cmd`, then saves the store even if the command failed midway
async fn execute(
    path: &Path,
    store: MockStore,
    session: &SessionContext,
    cmd: Command,
) -> anyhow::Result<()> {
    let client = ForumClient::new(store.clone());
    let res = run(&client, session, cmd).await;
    drop(client);
    tracing::debug!(live_feeds = store.live_feed_count(), "saving store");
    save(path, &store)?;
    res
}

async fn run(
    client: &ForumClient<MockStore>,
    session: &SessionContext,
    cmd: Command,
) -> anyhow::Result<()> {
    client
        .subscribe(CollectionKey::all_posts())
        .context("subscribing to posts")?;

    match cmd {
        Command::Show { post: None } => {
            client.pump();
            for p in client.all_posts() {
                println!(
                    "[{}] {} ({} likes)",
                    p.id,
                    p.title.as_deref().unwrap_or_default(),
                    p.like_count()
                );
            }
        }
        Command::Show { post: Some(post) } => {
            let post = EntityId(post);
            let p = client
                .fetch_post(&post)
                .await
                .with_context(|| format!("fetching post {}", post))?;
            client.subscribe(CollectionKey::comments_of(post.clone()))?;
            client.pump();
            for c in client.comments_for(&post) {
                client.subscribe(CollectionKey::replies_of(c.id.clone()))?;
            }
            client.pump();
            println!(
                "{} by {}\n{}\n({} likes)",
                p.title.as_deref().unwrap_or_default(),
                p.author.display_name,
                p.content,
                p.like_count()
            );
            print_post(client, &post);
        }
        Command::Post {
            category,
            title,
            content,
        } => {
            let p = client
                .create_post(session, EntityId(category), title, content)
                .await
                .context("creating post")?;
            println!("{}", p.id);
        }
        Command::Comment { post, content } => {
            let c = client
                .create_comment(session, EntityId(post), content)
                .await
                .context("creating comment")?;
            println!("{}", c.id);
        }
        Command::Reply {
            post,
            comment,
            content,
        } => {
            client.subscribe(CollectionKey::comments_of(EntityId(post)))?;
            client.pump();
            let r = client
                .create_reply(session, EntityId(comment), content)
                .await
                .context("creating reply")?;
            println!("{}", r.id);
        }
        Command::Like { post, comment } => {
            let post = EntityId(post);
            client.subscribe(CollectionKey::comments_of(post.clone()))?;
            client.pump();
            let target = comment.map(EntityId).unwrap_or(post);
            let liked = client
                .toggle_like(session, &target)
                .await
                .with_context(|| format!("toggling like on {}", target))?;
            println!(
                "{} {} ({} likes)",
                if liked { "liked" } else { "unliked" },
                target,
                client.like_count_for(&target).unwrap_or(0)
            );
        }
    }

    Ok(())
}
