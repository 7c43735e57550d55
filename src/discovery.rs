//! Resolves which channels a dump covers.
//!
//! Guilds are offered one by one to a [`GuildSelector`] in the order the user
//! arranged them in the client; accepted guilds contribute their text
//! channels. Direct-message channels are always included, after the guilds.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::api::{get_json, ChatApi};
use crate::error::Result;
use crate::model::{Channel, Guild, RawChannel, User, GUILD_TEXT};
use crate::snowflake::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildDecision {
    Include,
    Skip,
    /// Stop asking; remaining guilds are left out.
    Stop,
}

impl GuildDecision {
    /// `y…` includes, `n…` skips, anything else stops.
    pub fn from_answer(answer: &str) -> Self {
        let answer = answer.trim_start();
        if answer.starts_with('y') {
            GuildDecision::Include
        } else if answer.starts_with('n') {
            GuildDecision::Skip
        } else {
            GuildDecision::Stop
        }
    }
}

#[async_trait]
pub trait GuildSelector: Send {
    async fn decide(&mut self, guild: &Guild) -> Result<GuildDecision>;

    /// Called after an included guild's channels were listed.
    async fn added(&mut self, _guild: &Guild, _channels: usize) -> Result<()> {
        Ok(())
    }
}

/// Includes every guild without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl GuildSelector for AcceptAll {
    async fn decide(&mut self, _guild: &Guild) -> Result<GuildDecision> {
        Ok(GuildDecision::Include)
    }
}

pub fn guild_question(guild: &Guild) -> String {
    let mut question = format!("Log all channels in {}? [y/n]", guild.name);
    let role = if guild.owner {
        Some("owner")
    } else if guild.is_admin() {
        Some("admin")
    } else {
        None
    };
    if let Some(role) = role {
        question.push_str(&format!(" ({})", role));
    }
    question
}

/// Asks on a line-oriented terminal. End of input counts as "stop".
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl PromptSelector<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }
}

impl<R, W> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R, W> PromptSelector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn say(&mut self, line: &str) -> Result<()> {
        self.output.write_all(line.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> GuildSelector for PromptSelector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&mut self, guild: &Guild) -> Result<GuildDecision> {
        self.say(&guild_question(guild)).await?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer).await? == 0 {
            return Ok(GuildDecision::Stop);
        }
        Ok(GuildDecision::from_answer(&answer))
    }

    async fn added(&mut self, _guild: &Guild, channels: usize) -> Result<()> {
        self.say(&format!("Adding {} channels", channels)).await
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserSettings {
    #[serde(default)]
    guild_positions: Vec<Snowflake>,
}

/// Everything a dump run needs to know up front.
#[derive(Debug, Clone)]
pub struct DumpTargets {
    pub me: User,
    pub channels: Vec<Channel>,
}

/// Order guilds the way the client shows them. Guilds missing from
/// `positions` come first, keeping their relative order.
pub fn sort_guilds(guilds: &mut [Guild], positions: &[Snowflake]) {
    guilds.sort_by_key(|guild| {
        positions
            .iter()
            .position(|id| *id == guild.id)
            .map_or(-1, |p| p as i64)
    });
}

pub async fn guild_text_channels<A: ChatApi + ?Sized>(api: &A, guild: &Guild) -> Result<Vec<Channel>> {
    let raw: Vec<RawChannel> = get_json(api, &format!("guilds/{}/channels", guild.id), &[]).await?;
    Ok(raw
        .into_iter()
        .filter(|channel| channel.kind == GUILD_TEXT)
        .map(|channel| Channel::from_raw(channel, Some(guild)))
        .collect())
}

/// Fetch the account, its guilds and DMs, and let `selector` pick guilds.
pub async fn discover<A, S>(api: &A, selector: &mut S) -> Result<DumpTargets>
where
    A: ChatApi + ?Sized,
    S: GuildSelector + ?Sized,
{
    let (me, settings, dms, guilds) = tokio::join!(
        get_json::<User, A>(api, "users/@me", &[]),
        get_json::<UserSettings, A>(api, "users/@me/settings", &[]),
        get_json::<Vec<RawChannel>, A>(api, "users/@me/channels", &[]),
        get_json::<Vec<Guild>, A>(api, "users/@me/guilds", &[]),
    );
    let me = me?;
    let dms = dms?;
    let mut guilds = guilds?;

    match settings {
        Ok(settings) => sort_guilds(&mut guilds, &settings.guild_positions),
        Err(err) => warn!("Could not load user settings, keeping guild order: {}", err),
    }

    let mut channels = Vec::new();
    for guild in &guilds {
        match selector.decide(guild).await? {
            GuildDecision::Include => {
                let found = guild_text_channels(api, guild).await?;
                info!(guild = %guild.name, channels = found.len(), "Guild selected");
                selector.added(guild, found.len()).await?;
                channels.extend(found);
            }
            GuildDecision::Skip => {}
            GuildDecision::Stop => break,
        }
    }

    channels.extend(dms.into_iter().map(|dm| Channel::from_raw(dm, None)));

    Ok(DumpTargets { me, channels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::test_support::ScriptedApi;
    use serde_json::json;

    fn guild(id: u64, name: &str, owner: bool, permissions: u64) -> Guild {
        Guild {
            id: Snowflake(id),
            name: name.to_string(),
            owner,
            permissions,
        }
    }

    fn scripted_account(api: &ScriptedApi) {
        api.push("users/@me", Ok(json!({"id": "7", "username": "alice"})));
        api.push("users/@me/settings", Ok(json!({"guild_positions": ["20", "10"]})));
        api.push(
            "users/@me/channels",
            Ok(json!([{"id": "300", "type": 1, "recipients": [
                {"id": "8", "username": "bob"}, {"id": "9", "username": "carol"}
            ]}])),
        );
        api.push(
            "users/@me/guilds",
            Ok(json!([
                {"id": "10", "name": "Ten", "owner": false, "permissions": "8"},
                {"id": "20", "name": "Twenty", "owner": true, "permissions": 0}
            ])),
        );
        api.push(
            "guilds/20/channels",
            Ok(json!([
                {"id": "201", "type": 0, "name": "general"},
                {"id": "202", "type": 2, "name": "voice"}
            ])),
        );
        api.push("guilds/10/channels", Ok(json!([{"id": "101", "type": 0, "name": "news"}])));
    }

    struct Scripted(Vec<GuildDecision>, Vec<String>);

    #[async_trait]
    impl GuildSelector for Scripted {
        async fn decide(&mut self, guild: &Guild) -> Result<GuildDecision> {
            self.1.push(guild.name.clone());
            Ok(self.0.remove(0))
        }
    }

    #[test]
    fn question_mentions_role() {
        assert_eq!(guild_question(&guild(1, "Plain", false, 0)), "Log all channels in Plain? [y/n]");
        assert_eq!(
            guild_question(&guild(1, "Mod", false, 0x8)),
            "Log all channels in Mod? [y/n] (admin)"
        );
        assert_eq!(
            guild_question(&guild(1, "Mine", true, 0x8)),
            "Log all channels in Mine? [y/n] (owner)"
        );
    }

    #[test]
    fn answers_map_to_decisions() {
        assert_eq!(GuildDecision::from_answer("yes\n"), GuildDecision::Include);
        assert_eq!(GuildDecision::from_answer("n"), GuildDecision::Skip);
        assert_eq!(GuildDecision::from_answer("q"), GuildDecision::Stop);
        assert_eq!(GuildDecision::from_answer(""), GuildDecision::Stop);
    }

    #[test]
    fn unknown_guilds_sort_first() {
        let mut guilds = vec![guild(1, "a", false, 0), guild(2, "b", false, 0), guild(3, "c", false, 0)];
        sort_guilds(&mut guilds, &[Snowflake(3), Snowflake(1)]);
        let names: Vec<_> = guilds.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn collects_selected_guild_channels_then_dms() {
        let api = ScriptedApi::new();
        scripted_account(&api);

        let targets = discover(&api, &mut AcceptAll).await.unwrap();

        assert_eq!(targets.me.username, "alice");
        let names: Vec<_> = targets.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["general", "news", "bob, carol"]);
        assert_eq!(targets.channels[0].guild.as_ref().unwrap().name, "Twenty");
        assert!(targets.channels[2].is_direct_message());
    }

    #[tokio::test]
    async fn stop_answer_ends_selection() {
        let api = ScriptedApi::new();
        scripted_account(&api);

        let mut selector = Scripted(vec![GuildDecision::Stop], Vec::new());
        let targets = discover(&api, &mut selector).await.unwrap();

        assert_eq!(selector.1, vec!["Twenty"]);
        let names: Vec<_> = targets.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bob, carol"]);
        assert!(api.calls().iter().all(|c| !c.path.starts_with("guilds/")));
    }

    #[tokio::test]
    async fn skip_answer_moves_to_next_guild() {
        let api = ScriptedApi::new();
        scripted_account(&api);

        let mut selector = Scripted(vec![GuildDecision::Skip, GuildDecision::Include], Vec::new());
        let targets = discover(&api, &mut selector).await.unwrap();

        let names: Vec<_> = targets.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["news", "bob, carol"]);
    }

    #[tokio::test]
    async fn missing_settings_keep_api_order() {
        let api = ScriptedApi::new();
        api.push("users/@me", Ok(json!({"id": "7", "username": "alice"})));
        api.push("users/@me/settings", Err(ApiError::Forbidden));
        api.push(
            "users/@me/guilds",
            Ok(json!([
                {"id": "10", "name": "Ten"},
                {"id": "20", "name": "Twenty"}
            ])),
        );

        let mut selector = Scripted(vec![GuildDecision::Skip, GuildDecision::Skip], Vec::new());
        discover(&api, &mut selector).await.unwrap();
        assert_eq!(selector.1, vec!["Ten", "Twenty"]);
    }

    #[tokio::test]
    async fn prompt_selector_reads_answers_from_input() {
        let input: &[u8] = b"y\nno thanks\n";
        let mut selector = PromptSelector::new(input, Vec::new());

        let g = guild(5, "Five", true, 0);
        assert_eq!(selector.decide(&g).await.unwrap(), GuildDecision::Include);
        selector.added(&g, 3).await.unwrap();
        assert_eq!(selector.decide(&g).await.unwrap(), GuildDecision::Skip);
        assert_eq!(selector.decide(&g).await.unwrap(), GuildDecision::Stop);

        let printed = String::from_utf8(selector.into_output()).unwrap();
        assert_eq!(
            printed,
            "Log all channels in Five? [y/n] (owner)\nAdding 3 channels\n\
             Log all channels in Five? [y/n] (owner)\n\
             Log all channels in Five? [y/n] (owner)\n"
        );
    }
}
