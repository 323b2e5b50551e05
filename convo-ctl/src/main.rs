use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use convo_api::{
    Api, AuthToken, CommentId, Content, ConversationId, Error, SortMode, TokenProvider, UserId,
    Vote,
};
use convo_client::{Config, ConversationSession, Remote, ThreadItem};
use convo_mock_server::{Fixture, MockServer, MockTokens};

mod http;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Base URL of the conversation service
    #[structopt(short, long, default_value = "http://localhost:8000")]
    host: String,

    /// Publisher key used to qualify conversation ids
    #[structopt(long)]
    spot_key: Option<String>,

    /// Serve the conversation from a JSON fixture instead of the network
    #[structopt(long, parse(from_os_str))]
    fixture: Option<PathBuf>,

    #[structopt(short, long)]
    conversation: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Print the conversation, then follow it live until interrupted
    Watch {
        #[structopt(long, default_value = "best")]
        sort: SortMode,

        /// Pages to load before going live
        #[structopt(long, default_value = "1")]
        pages: u32,
    },

    /// Upvote a comment, or downvote it with --down
    Vote {
        comment: String,

        #[structopt(long)]
        down: bool,
    },

    Delete {
        comment: String,
    },

    /// Replace the text of a comment
    Edit {
        comment: String,
        text: String,
    },

    /// Hide everything a user wrote
    Mute {
        user: String,
    },

    Report {
        comment: String,
    },
}

/// Token read once from the environment, that cannot be refreshed
struct EnvToken(AuthToken);

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<AuthToken, Error> {
        Ok(self.0.clone())
    }

    async fn refresh(&self) -> Result<AuthToken, Error> {
        Err(Error::Unauthorized)
    }
}

fn env_token() -> anyhow::Result<AuthToken> {
    let tok = std::env::var("CONVO_TOKEN").context("retrieving CONVO_TOKEN environment variable")?;
    Ok(AuthToken(tok))
}

fn remote(opt: &Opt) -> anyhow::Result<Remote> {
    Ok(match &opt.fixture {
        Some(path) => {
            let server = Arc::new(MockServer::from_fixture(Fixture::load(path)?));
            let tokens = Arc::new(MockTokens::new(server.clone()));
            Remote::new(server as Arc<dyn Api>, tokens as Arc<dyn TokenProvider>)
        }
        None => Remote::new(
            Arc::new(http::HttpApi::new(opt.host.clone(), opt.spot_key.clone())),
            Arc::new(EnvToken(env_token()?)),
        ),
    })
}

fn show(item: &ThreadItem) {
    match item {
        ThreadItem::Comment(c) => {
            let text = match (c.deleted, c.text()) {
                (true, _) => "<deleted>",
                (false, Some(t)) => t,
                (false, None) => "<media>",
            };
            println!(
                "{}{} [{:+}] {}: {}",
                "  ".repeat(c.depth as usize),
                c.id,
                i64::from(c.rank.up) - i64::from(c.rank.down),
                c.author_id,
                text,
            );
        }
        ThreadItem::Spacer => println!(),
        ThreadItem::Skeleton => println!("..."),
    }
}

// Mutations act on the local copy, so it needs to hold the target first
async fn loaded(session: &ConversationSession) -> anyhow::Result<&ConversationSession> {
    session.load().await.context("loading the conversation")?;
    Ok(session)
}

async fn watch(
    session: &ConversationSession,
    sort: SortMode,
    pages: u32,
    refresh: Duration,
) -> anyhow::Result<()> {
    session
        .set_sort_mode(sort)
        .await
        .context("loading the first page")?;
    for _ in 1..pages {
        if !session.snapshot().borrow().has_next {
            break;
        }
        session.load_more().await.context("loading next page")?;
    }
    let snapshot = session.snapshot().borrow().clone();
    println!(
        "# {} ({} messages, sorted by {})",
        snapshot.conversation_id, snapshot.messages_count, snapshot.sort_mode
    );
    let items = session.visible_items();
    items.iter().for_each(show);
    let mut shown = items
        .into_iter()
        .filter_map(|i| match i {
            ThreadItem::Comment(c) => Some(c.id),
            _ => None,
        })
        .collect::<HashSet<_>>();

    session.start_realtime();
    let mut presence = session.presence();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(refresh);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("listening for interruption")?;
                break;
            }
            res = presence.changed() => {
                res.context("session went away")?;
                let p = *presence.borrow();
                println!("# {} typing, {} online", p.typing_users, p.online_viewers);
            }
            _ = tick.tick() => {
                for c in session.visible_comments() {
                    if shown.insert(c.id.clone()) {
                        show(&ThreadItem::Comment(c));
                    }
                }
            }
        }
    }
    session.stop_realtime();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let config = Config::from_env()?;
    let session = ConversationSession::new(
        ConversationId(opt.conversation.clone()),
        remote(&opt)?,
        &config,
    );

    let submission = match opt.cmd {
        Command::Watch { sort, pages } => {
            return watch(&session, sort, pages, config.realtime_min_delay()).await;
        }
        Command::Vote { comment, down } => {
            let direction = match down {
                true => Vote::Down,
                false => Vote::Up,
            };
            loaded(&session).await?.vote(&CommentId(comment), direction)?
        }
        Command::Delete { comment } => loaded(&session).await?.delete(&CommentId(comment))?,
        Command::Edit { comment, text } => loaded(&session)
            .await?
            .edit(&CommentId(comment), vec![Content::text(&text)])?,
        Command::Mute { user } => loaded(&session).await?.mute(&UserId(user))?,
        Command::Report { comment } => loaded(&session).await?.report(&CommentId(comment))?,
    };
    submission.wait().await?;
    println!("done");

    Ok(())
}
