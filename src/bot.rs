//! Update handlers and the state they share.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{MessageOrigin, User};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::renamer::commands::{self, Command};
use crate::renamer::database::KnownUser;
use crate::renamer::force_sub;
use crate::renamer::manual;
use crate::renamer::premium::{self, Target};
use crate::renamer::sequence::{self, SequencedFile};
use crate::renamer::{
    ChatApi, Database, IncomingMedia, MediaKind, PendingRenames, Renamer, Setting, TelegramClient,
};

const LEADERBOARD_SIZE: usize = 5;

const GENERIC_FAILURE: &str = "❌ Something went wrong, please try again later.";

const SEQUENCE_FILE_ADDED: &str = "📂 Your file has been added to the sequence!";
const SEQUENCE_STARTED: &str = "✅ Sequence mode started! Send your files now.";
const SEQUENCE_RUNNING: &str = "⚠️ A sequence is already running. Send /endsequence to finish it.";
const SEQUENCE_EMPTY: &str = "❌ No files in sequence!";
const SEQUENCE_DONE: &str = "✅ All files have been sequenced!";

const BAD_REPLY_TARGET: &str =
    "❌ Reply to a message from the user, or forward one of theirs and reply to that. Bots and yourself can't be targeted.";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] RequestError),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub struct BotState {
    pub config: Config,
    pub database: Arc<Database>,
    pub telegram: TelegramClient,
    pub renamer: Renamer,
    pub pending: PendingRenames,
    pub bot_username: String,
}

impl BotState {
    pub fn new(config: Config, database: Arc<Database>, bot: Bot, bot_username: String) -> Self {
        let telegram = TelegramClient::new(bot);
        let renamer = Renamer::new(
            telegram.clone(),
            database.clone(),
            config.tools.clone(),
            config.work_dir(),
            config.duplicate_window,
        );
        let pending = PendingRenames::new(config.rename_reply_timeout);
        Self {
            config,
            database,
            telegram,
            renamer,
            pending,
            bot_username,
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        send_reply(&self.telegram, chat_id, text).await;
    }
}

async fn send_reply<T: ChatApi>(api: &T, chat_id: i64, text: &str) {
    if let Err(e) = api.send_message(chat_id, text).await {
        warn!("Failed to send message to {}: {}", chat_id, e);
    }
}

/// Owners always count as premium.
fn has_premium(db: &Database, owner: bool, user_id: i64) -> rusqlite::Result<bool> {
    if owner {
        return Ok(true);
    }
    Ok(db.active_premium(user_id, Utc::now())?.is_some())
}

pub async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };

    let result = if msg.chat.is_private() {
        route_message(&state, &msg, &user).await
    } else {
        route_group_message(&state, &msg, &user).await
    };
    if let Err(e) = result {
        error!("Failed to handle message from {}: {}", user.id, e);
        state.reply(msg.chat.id.0, GENERIC_FAILURE).await;
    }
    Ok(())
}

/// Outside private chats only the owners' premium commands are answered.
async fn route_group_message(state: &Arc<BotState>, msg: &Message, user: &User) -> Result<(), HandlerError> {
    if !state.config.is_owner(user.id) {
        return Ok(());
    }
    let Some(cmd) = msg.text().and_then(|text| Command::parse(text, &state.bot_username).ok()) else {
        return Ok(());
    };
    if !works_in_groups(&cmd) {
        return Ok(());
    }
    handle_command(state, msg, user, cmd).await
}

fn works_in_groups(cmd: &Command) -> bool {
    matches!(cmd, Command::AddPremium(_) | Command::RmPremium(_) | Command::MyPlan(_))
}

async fn route_message(state: &Arc<BotState>, msg: &Message, user: &User) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id.0;
    let user_id = user.id.0 as i64;
    state
        .database
        .touch_user(user_id, user.username.as_deref(), &user.first_name)?;

    if !state.config.force_sub_channels.is_empty() {
        let missing = force_sub::not_joined(&state.telegram, &state.config.force_sub_channels, user.id.0).await;
        if !missing.is_empty() {
            info!("User {} has not joined {:?}", user_id, missing);
            return send_join_prompt(state, chat_id, &missing).await;
        }
    }

    if let Some(text) = msg.text() {
        return match Command::parse(text, &state.bot_username) {
            Ok(cmd) => handle_command(state, msg, user, cmd).await,
            Err(_) => handle_text(state, chat_id, user_id, text).await,
        };
    }

    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        state
            .database
            .set_setting(user_id, Setting::Thumbnail, Some(photo.file.id.0.as_str()))?;
        info!("Saved thumbnail for {}", user_id);
        state.reply(chat_id, "✅ <b>Thumbnail saved successfully</b>").await;
        return Ok(());
    }

    if let Some(media) = IncomingMedia::from_message(msg) {
        return handle_file(state, msg, user.id, media).await;
    }
    Ok(())
}

async fn send_join_prompt(state: &BotState, chat_id: i64, missing: &[String]) -> Result<(), HandlerError> {
    let keyboard = force_sub::join_keyboard(missing);
    match &state.config.force_sub_image_url {
        Some(url) => {
            state
                .telegram
                .send_photo_url(chat_id, url.clone(), force_sub::JOIN_PROMPT, keyboard)
                .await?
        }
        None => {
            state
                .telegram
                .send_with_keyboard(chat_id, force_sub::JOIN_PROMPT, keyboard)
                .await?
        }
    };
    Ok(())
}

async fn handle_file(
    state: &Arc<BotState>,
    msg: &Message,
    user: UserId,
    media: IncomingMedia,
) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id.0;
    let user_id = user.0 as i64;
    let file = SequencedFile {
        chat_id,
        message_id: msg.id.0,
        file_name: media.file_name.clone(),
    };
    let accepted = accept_file(
        &state.telegram,
        &state.database,
        &state.config.premium_contact,
        state.config.is_owner(user),
        user_id,
        file,
    )
    .await?;
    let Some(template) = accepted else {
        return Ok(());
    };

    let renamer = state.renamer.clone();
    tokio::spawn(async move {
        renamer.auto_rename(chat_id, user_id, &template, media).await;
    });
    Ok(())
}

/// An open sequence takes the file before the premium and template checks.
/// Returns the template when the file should be renamed now.
async fn accept_file<T: ChatApi>(
    api: &T,
    db: &Database,
    premium_contact: &str,
    owner: bool,
    user_id: i64,
    file: SequencedFile,
) -> Result<Option<String>, HandlerError> {
    let chat_id = file.chat_id;
    if db.is_in_sequence(user_id)? {
        db.add_sequence_file(user_id, &file)?;
        send_reply(api, chat_id, SEQUENCE_FILE_ADDED).await;
        return Ok(None);
    }

    if !has_premium(db, owner, user_id)? {
        send_reply(api, chat_id, &commands::premium_required(premium_contact)).await;
        return Ok(None);
    }

    let template = db.get_setting(user_id, Setting::FormatTemplate)?;
    if template.is_none() {
        send_reply(api, chat_id, commands::NO_FORMAT).await;
    }
    Ok(template)
}

/// Plain text is only meaningful as the answer to a `/rename` prompt.
async fn handle_text(state: &Arc<BotState>, chat_id: i64, user_id: i64, text: &str) -> Result<(), HandlerError> {
    if text.starts_with('/') {
        return Ok(());
    }
    let Some(pending) = state.pending.take(user_id).await else {
        return Ok(());
    };
    match manual::validate_new_name(text) {
        Ok(name) => spawn_manual_rename(state, pending.chat_id, pending.media, name),
        Err(hint) => state.reply(chat_id, hint).await,
    }
    Ok(())
}

fn spawn_manual_rename(state: &Arc<BotState>, chat_id: i64, media: IncomingMedia, new_name: String) {
    let state = state.clone();
    tokio::spawn(async move {
        info!("Manual rename {:?} -> {:?}", media.file_name, new_name);
        if let Err(e) = state.renamer.manual_rename(chat_id, &media, &new_name).await {
            error!("Manual rename failed: {}", e);
            state
                .reply(chat_id, &format!("Error: {}", html::escape(&e.to_string())))
                .await;
        }
    });
}

async fn handle_command(state: &Arc<BotState>, msg: &Message, user: &User, cmd: Command) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id.0;
    let user_id = user.id.0 as i64;
    let db = &state.database;

    match cmd {
        Command::Start(_) => state.reply(chat_id, &commands::start_text(&user.first_name)).await,
        Command::Help => state.reply(chat_id, &commands::help_text()).await,
        Command::Autorename(template) => {
            let template = template.trim();
            if !template.is_empty() {
                db.set_setting(user_id, Setting::FormatTemplate, Some(template))?;
                info!("Format template for {} set to {:?}", user_id, template);
                state.reply(chat_id, &commands::format_set(template)).await;
            } else if let Some(current) = db.get_setting(user_id, Setting::FormatTemplate)? {
                state.reply(chat_id, &commands::format_current(&current)).await;
            } else {
                state.reply(chat_id, commands::AUTORENAME_USAGE).await;
            }
        }
        Command::SetMedia(kind) => match kind.parse::<MediaKind>() {
            Ok(kind) => {
                db.set_setting(user_id, Setting::MediaPreference, Some(kind.as_str()))?;
                state.reply(chat_id, &commands::media_set(kind)).await;
            }
            Err(_) => {
                state
                    .telegram
                    .send_with_keyboard(chat_id, commands::SETMEDIA_PROMPT, commands::setmedia_keyboard())
                    .await?;
            }
        },
        Command::SetCaption(caption) => {
            let caption = caption.trim();
            if caption.is_empty() {
                state.reply(chat_id, commands::CAPTION_USAGE).await;
            } else {
                db.set_setting(user_id, Setting::Caption, Some(caption))?;
                state.reply(chat_id, "✅ <b>Your caption has been saved</b>").await;
            }
        }
        Command::DelCaption => {
            db.set_setting(user_id, Setting::Caption, None)?;
            state.reply(chat_id, "🗑️ <b>Caption deleted</b>").await;
        }
        Command::SeeCaption => match db.get_setting(user_id, Setting::Caption)? {
            Some(caption) => state.reply(chat_id, &commands::caption_current(&caption)).await,
            None => state.reply(chat_id, "😔 <b>You don't have any caption</b>").await,
        },
        Command::ViewThumb => match db.get_setting(user_id, Setting::Thumbnail)? {
            Some(file_id) => {
                state.telegram.send_photo_id(chat_id, &file_id, "<b>Your thumbnail</b>").await?;
            }
            None => state.reply(chat_id, "😔 <b>You don't have any thumbnail</b>").await,
        },
        Command::DelThumb => {
            db.set_setting(user_id, Setting::Thumbnail, None)?;
            state.reply(chat_id, "🗑️ <b>Thumbnail deleted</b>").await;
        }
        cmd @ (Command::SetTitle(_)
        | Command::SetArtist(_)
        | Command::SetAuthor(_)
        | Command::SetVideo(_)
        | Command::SetAudio(_)
        | Command::SetSubtitle(_)) => {
            if let Some((field, value)) = cmd.metadata_update() {
                if value.is_empty() {
                    state.reply(chat_id, &commands::metadata_usage(field)).await;
                } else {
                    db.set_setting(user_id, field.setting, Some(value))?;
                    state.reply(chat_id, &commands::metadata_saved(field, value)).await;
                }
            }
        }
        Command::Metadata => {
            let tags = db.metadata_tags(user_id)?;
            state.reply(chat_id, &commands::metadata_view(&tags)).await;
        }
        Command::StartSequence => start_sequence(&state.telegram, db, chat_id, user_id).await?,
        Command::EndSequence => {
            end_sequence(
                &state.telegram,
                db,
                state.config.sequence_send_delay,
                chat_id,
                user_id,
                &user.first_name,
            )
            .await?
        }
        Command::Leaderboard => {
            let entries = db.leaderboard(LEADERBOARD_SIZE)?;
            state.reply(chat_id, &sequence::format_leaderboard(&entries)).await;
        }
        Command::MyPlan(args) => my_plan(state, chat_id, user, &args).await?,
        Command::Rename(args) => start_manual_rename(state, msg, user, &args).await,
        Command::Cancel => {
            if state.pending.cancel(user_id).await {
                state.reply(chat_id, "✅ Rename cancelled.").await;
            } else {
                state.reply(chat_id, "Nothing to cancel.").await;
            }
        }
        Command::AddPremium(args) => {
            if state.config.is_owner(user.id) {
                add_premium(state, msg, user.id, &args).await?;
            }
        }
        Command::RmPremium(args) => {
            if state.config.is_owner(user.id) {
                remove_premium(state, msg, user.id, &args).await?;
            }
        }
    }
    Ok(())
}

async fn start_sequence<T: ChatApi>(api: &T, db: &Database, chat_id: i64, user_id: i64) -> Result<(), HandlerError> {
    if db.start_sequence(user_id)? {
        info!("Sequence started for {}", user_id);
        send_reply(api, chat_id, SEQUENCE_STARTED).await;
    } else {
        send_reply(api, chat_id, SEQUENCE_RUNNING).await;
    }
    Ok(())
}

/// Send the stored files back in episode order, then close the sequence.
/// An empty sequence stays open.
async fn end_sequence<T: ChatApi>(
    api: &T,
    db: &Database,
    delay: Duration,
    chat_id: i64,
    user_id: i64,
    first_name: &str,
) -> Result<(), HandlerError> {
    let mut files = db.sequence_files(user_id)?;
    if files.is_empty() {
        send_reply(api, chat_id, SEQUENCE_EMPTY).await;
        return Ok(());
    }

    sequence::sort_by_episode(&mut files);
    for file in &files {
        if let Err(e) = api.copy_message(chat_id, file.chat_id, file.message_id).await {
            warn!("Failed to copy {:?} for {}: {}", file.file_name, user_id, e);
        }
        tokio::time::sleep(delay).await;
    }

    db.finish_sequence(user_id, files.len(), first_name)?;
    info!("Sequenced {} files for {}", files.len(), user_id);
    send_reply(api, chat_id, SEQUENCE_DONE).await;
    Ok(())
}

async fn start_manual_rename(state: &Arc<BotState>, msg: &Message, user: &User, args: &str) {
    let chat_id = msg.chat.id.0;
    if !state.config.can_manual_rename(user.id) {
        state
            .reply(chat_id, &commands::premium_required(&state.config.premium_contact))
            .await;
        return;
    }

    let Some(media) = msg.reply_to_message().and_then(IncomingMedia::from_message) else {
        state
            .reply(chat_id, "Reply to a document, video or audio file with /rename.")
            .await;
        return;
    };

    let args = args.trim();
    if !args.is_empty() {
        match manual::validate_new_name(args) {
            Ok(name) => spawn_manual_rename(state, chat_id, media, name),
            Err(hint) => state.reply(chat_id, hint).await,
        }
        return;
    }

    let prompt = format!(
        "📁 <b>Current file name:</b>\n<code>{}</code>\n\nSend me the new file name (with extension):",
        html::escape(&media.file_name)
    );
    let user_id = user.id.0 as i64;
    let token = state.pending.insert(user_id, chat_id, media).await;
    state.reply(chat_id, &prompt).await;

    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(state.pending.timeout()).await;
        if let Some(expired) = state.pending.expire(user_id, token).await {
            state
                .reply(expired.chat_id, "❗ Timed out. Send /rename again and reply quicker.")
                .await;
        }
    });
}

/// How a user is named in owner-facing replies.
fn display_name(user_id: i64, known: Option<&KnownUser>) -> String {
    match known {
        Some(KnownUser { username: Some(username), .. }) => format!("@{}", html::escape(username)),
        Some(KnownUser { first_name, .. }) if !first_name.is_empty() => {
            format!("<a href=\"tg://user?id={}\">{}</a>", user_id, html::escape(first_name))
        }
        _ => format!("User ID: <code>{user_id}</code>"),
    }
}

/// Resolve a premium target to a user id and display name. Usernames only
/// resolve for users the bot has seen.
fn resolve_target(db: &Database, target: &Target) -> rusqlite::Result<Option<(i64, String)>> {
    match target {
        Target::Id(id) => {
            let known = db.get_user(*id)?;
            Ok(Some((*id, display_name(*id, known.as_ref()))))
        }
        Target::Username(name) => Ok(db
            .find_user_by_username(name)?
            .map(|user| (user.user_id, display_name(user.user_id, Some(&user))))),
    }
}

fn target_not_found(target: &Target) -> String {
    match target {
        Target::Username(name) => format!(
            "❌ User @{} not found. They need to start the bot first.",
            html::escape(name)
        ),
        Target::Id(id) => format!("❌ User <code>{id}</code> not found."),
    }
}

/// Who a reply-form premium command is about.
#[derive(Debug, PartialEq, Eq)]
enum ReplyTarget {
    NoReply,
    User(i64),
    /// The reply points at the caller, a bot or a hidden sender.
    Refused,
}

impl ReplyTarget {
    fn user_id(&self) -> Option<i64> {
        match self {
            ReplyTarget::User(id) => Some(*id),
            _ => None,
        }
    }
}

/// A forwarded message names its original sender. Otherwise the replied
/// message's author is the target.
fn reply_target<'a>(caller: UserId, reply: Option<&'a Message>) -> (ReplyTarget, Option<&'a User>) {
    let Some(reply) = reply else {
        return (ReplyTarget::NoReply, None);
    };
    let subject = match reply.forward_origin() {
        Some(MessageOrigin::User { sender_user, .. }) => Some(sender_user),
        Some(_) => None,
        None => reply.from.as_ref(),
    };
    match subject {
        Some(user) if !user.is_bot && user.id != caller => (ReplyTarget::User(user.id.0 as i64), Some(user)),
        _ => (ReplyTarget::Refused, None),
    }
}

/// Resolve the reply target, recording the user so it can be named later.
fn reply_user(state: &BotState, msg: &Message, caller: UserId) -> rusqlite::Result<ReplyTarget> {
    let (target, user) = reply_target(caller, msg.reply_to_message());
    if let Some(user) = user {
        state
            .database
            .touch_user(user.id.0 as i64, user.username.as_deref(), &user.first_name)?;
    }
    Ok(target)
}

/// Usage text, or the refusal when an unusable reply was the only target.
fn premium_usage(target: &ReplyTarget, usage: &'static str) -> &'static str {
    match target {
        ReplyTarget::Refused => BAD_REPLY_TARGET,
        _ => usage,
    }
}

async fn add_premium(state: &BotState, msg: &Message, caller: UserId, args: &str) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id.0;
    let reply = reply_user(state, msg, caller)?;
    let Some((target, duration)) = premium::parse_add_args(args, reply.user_id()) else {
        state.reply(chat_id, premium_usage(&reply, premium::ADD_USAGE)).await;
        return Ok(());
    };
    let duration = match premium::parse_plan_duration(&duration) {
        Ok(duration) => duration,
        Err(e) => {
            state.reply(chat_id, &format!("❌ {}", html::escape(&e.to_string()))).await;
            return Ok(());
        }
    };
    let Some((user_id, name)) = resolve_target(&state.database, &target)? else {
        state.reply(chat_id, &target_not_found(&target)).await;
        return Ok(());
    };

    let expiry = premium::expiry_from(Utc::now(), duration);
    state.database.set_premium(user_id, expiry)?;
    info!("Premium granted to {} until {}", user_id, expiry);

    let expiry_text = premium::format_expiry(expiry);
    state
        .reply(
            chat_id,
            &format!(
                "✅ Successfully added {name} as premium user!\n\nPremium will expire on: <code>{expiry_text}</code>"
            ),
        )
        .await;
    if let Err(e) = state
        .telegram
        .send_message(
            user_id,
            &format!("🎉 <b>You now have premium access!</b>\n\nYour plan expires on: <code>{expiry_text}</code>"),
        )
        .await
    {
        info!("Could not notify {} about premium: {}", user_id, e);
    }
    Ok(())
}

async fn remove_premium(state: &BotState, msg: &Message, caller: UserId, args: &str) -> Result<(), HandlerError> {
    let chat_id = msg.chat.id.0;
    let reply = reply_user(state, msg, caller)?;
    let Some(target) = premium::parse_remove_args(args, reply.user_id()) else {
        state.reply(chat_id, premium_usage(&reply, premium::REMOVE_USAGE)).await;
        return Ok(());
    };
    let Some((user_id, name)) = resolve_target(&state.database, &target)? else {
        state.reply(chat_id, &target_not_found(&target)).await;
        return Ok(());
    };

    if state.database.remove_premium(user_id)? {
        info!("Premium removed from {}", user_id);
        state
            .reply(chat_id, &format!("✅ Successfully removed premium access from {name}"))
            .await;
    } else {
        state
            .reply(chat_id, &format!("❌ {name} does not have premium access"))
            .await;
    }
    Ok(())
}

async fn my_plan(state: &BotState, chat_id: i64, user: &User, args: &str) -> Result<(), HandlerError> {
    let mut target_id = user.id.0 as i64;
    if state.config.is_owner(user.id) && !args.trim().is_empty() {
        let Some(target) = premium::parse_remove_args(args, None) else {
            state
                .reply(chat_id, "<b>Usage:</b> <code>/myplan [userid/username]</code>")
                .await;
            return Ok(());
        };
        match resolve_target(&state.database, &target)? {
            Some((id, _)) => target_id = id,
            None => {
                state.reply(chat_id, &target_not_found(&target)).await;
                return Ok(());
            }
        }
    }

    if state.config.is_owner(UserId(target_id as u64)) {
        state
            .reply(chat_id, "✨ <b>Premium Status: Active</b> ✨\n\nBot owners always have premium access.")
            .await;
        return Ok(());
    }

    let now = Utc::now();
    let text = match state.database.active_premium(target_id, now)? {
        Some(expiry) => format!(
            "✨ <b>Premium Status: Active</b> ✨\n\n\
             <b>Expires on:</b> <code>{}</code>\n\
             <b>Time remaining:</b> <code>{}</code>\n\n\
             You have access to all premium features including file renaming!",
            premium::format_expiry(expiry),
            premium::format_remaining(expiry - now)
        ),
        None => format!(
            "❌ <b>Premium Status: Inactive</b> ❌\n\n\
             You don't have premium access. Contact {} to get premium and unlock file renaming features!",
            html::escape(&state.config.premium_contact)
        ),
    };
    state.reply(chat_id, &text).await;
    Ok(())
}

pub async fn handle_callback(query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };

    if let Err(e) = route_callback(&state, &query, &data).await {
        error!("Failed to handle callback {:?} from {}: {}", data, query.from.id, e);
        state.telegram.answer_callback(&query, Some("Something went wrong")).await;
    }
    Ok(())
}

async fn route_callback(state: &BotState, query: &CallbackQuery, data: &str) -> Result<(), HandlerError> {
    let Some(message) = query.regular_message() else {
        state.telegram.answer_callback(query, None).await;
        return Ok(());
    };
    let chat_id = message.chat.id.0;
    let message_id = message.id.0;

    if data == force_sub::CHECK_SUBSCRIPTION {
        recheck_subscription(
            &state.telegram,
            &state.config.force_sub_channels,
            query.from.id.0,
            (chat_id, message_id),
            message.photo().is_some(),
        )
        .await?;
        state.telegram.answer_callback(query, None).await;
    } else if data == force_sub::HELP {
        state.telegram.answer_callback(query, None).await;
        state.reply(chat_id, &commands::help_text()).await;
    } else if let Some(kind) = commands::parse_setmedia(data) {
        let user_id = query.from.id.0 as i64;
        state
            .database
            .set_setting(user_id, Setting::MediaPreference, Some(kind.as_str()))?;
        info!("Media preference for {} set to {}", user_id, kind);
        state.telegram.edit_status(chat_id, message_id, &commands::media_set(kind)).await;
        state
            .telegram
            .answer_callback(query, Some(&format!("Media preference set to {kind}")))
            .await;
    } else {
        state.telegram.answer_callback(query, None).await;
    }
    Ok(())
}

/// Edit the join prompt in place. A photo prompt carries its text as the
/// caption.
async fn recheck_subscription<T: ChatApi>(
    api: &T,
    channels: &[String],
    user_id: u64,
    (chat_id, message_id): (i64, i32),
    has_photo: bool,
) -> Result<(), HandlerError> {
    let missing = force_sub::not_joined(api, channels, user_id).await;
    let (text, keyboard) = if missing.is_empty() {
        info!("User {} joined every channel", user_id);
        (force_sub::ALL_JOINED, force_sub::joined_keyboard())
    } else {
        (force_sub::STILL_MISSING, force_sub::join_keyboard(&missing))
    };
    let edited = if has_photo {
        api.edit_caption(chat_id, message_id, text, keyboard).await
    } else {
        api.edit_text_with_keyboard(chat_id, message_id, text, keyboard).await
    };
    match edited {
        Ok(()) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Clear expired plans and tell each affected user, forever.
pub async fn run_premium_expiry(state: Arc<BotState>) {
    let mut interval = tokio::time::interval(state.config.premium_check_interval);
    loop {
        interval.tick().await;
        let expired = match state.database.take_expired_premium(Utc::now()) {
            Ok(expired) => expired,
            Err(e) => {
                error!("Failed to check premium expiry: {}", e);
                continue;
            }
        };
        for user_id in expired {
            info!("Premium expired for {}", user_id);
            let text = format!(
                "⚠️ <b>Your premium plan has expired.</b>\n\nContact {} to renew it.",
                html::escape(&state.config.premium_contact)
            );
            if let Err(e) = state.telegram.send_message(user_id, &text).await {
                warn!("Failed to notify {} about expiry: {}", user_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use teloxide::types::InlineKeyboardMarkup;

    use crate::renamer::force_sub::{Membership, MembershipSource};

    const USER: i64 = 7;
    const CHAT: i64 = 7;

    /// Records what the handlers send instead of calling Telegram.
    #[derive(Default)]
    struct FakeChat {
        joined: HashSet<&'static str>,
        edit_error: Option<RequestError>,
        /// When set, each copy records whether `USER` still had a sequence open.
        database: Option<Arc<Database>>,
        sent: Mutex<Vec<String>>,
        edits: Mutex<Vec<(&'static str, String)>>,
        copies: Mutex<Vec<(i32, bool)>>,
    }

    impl FakeChat {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn edit(&self, kind: &'static str, text: &str) -> Result<(), RequestError> {
            self.edits.lock().unwrap().push((kind, text.to_string()));
            match &self.edit_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    impl MembershipSource for FakeChat {
        async fn membership(&self, channel: &str, _user_id: u64) -> Result<Membership, String> {
            Ok(if self.joined.contains(channel) {
                Membership::Joined
            } else {
                Membership::Left
            })
        }
    }

    impl ChatApi for FakeChat {
        async fn send_message(&self, _chat_id: i64, text: &str) -> Result<i32, RequestError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(text.to_string());
            Ok(sent.len() as i32)
        }

        async fn send_with_keyboard(
            &self,
            chat_id: i64,
            text: &str,
            _keyboard: InlineKeyboardMarkup,
        ) -> Result<i32, RequestError> {
            self.send_message(chat_id, text).await
        }

        async fn edit_caption(
            &self,
            _chat_id: i64,
            _message_id: i32,
            caption: &str,
            _keyboard: InlineKeyboardMarkup,
        ) -> Result<(), RequestError> {
            self.edit("caption", caption)
        }

        async fn edit_text_with_keyboard(
            &self,
            _chat_id: i64,
            _message_id: i32,
            text: &str,
            _keyboard: InlineKeyboardMarkup,
        ) -> Result<(), RequestError> {
            self.edit("text", text)
        }

        async fn copy_message(&self, _to_chat: i64, _from_chat: i64, message_id: i32) -> Result<(), RequestError> {
            let open = match &self.database {
                Some(db) => db.is_in_sequence(USER).unwrap(),
                None => false,
            };
            self.copies.lock().unwrap().push((message_id, open));
            Ok(())
        }
    }

    fn file(message_id: i32, name: &str) -> SequencedFile {
        SequencedFile {
            chat_id: CHAT,
            message_id,
            file_name: name.to_string(),
        }
    }

    fn message(json: &str) -> Message {
        serde_json::from_str(json).unwrap()
    }

    fn replied(from_id: u64, is_bot: bool, forward_origin: Option<&str>) -> Message {
        let origin = forward_origin
            .map(|origin| format!(r#""forward_origin": {origin},"#))
            .unwrap_or_default();
        message(&format!(
            r#"{{
                "message_id": 10,
                "date": 1700000000,
                "chat": {{"id": 1, "type": "private", "first_name": "Owner"}},
                "from": {{"id": {from_id}, "is_bot": {is_bot}, "first_name": "Someone"}},
                {origin}
                "text": "hi"
            }}"#
        ))
    }

    #[tokio::test]
    async fn test_file_in_open_sequence_is_stored_not_renamed() {
        let db = Database::new().unwrap();
        let chat = FakeChat::default();
        db.start_sequence(USER).unwrap();
        db.set_setting(USER, Setting::FormatTemplate, Some("Show E{episode}")).unwrap();

        // An owner with a template would otherwise be renamed right away.
        let accepted = accept_file(&chat, &db, "@admin", true, USER, file(1, "Show E01.mkv"))
            .await
            .unwrap();
        assert_eq!(accepted, None);
        // Non-premium users can still collect files.
        let accepted = accept_file(&chat, &db, "@admin", false, USER, file(2, "Show E02.mkv"))
            .await
            .unwrap();
        assert_eq!(accepted, None);

        assert_eq!(chat.sent(), vec![SEQUENCE_FILE_ADDED, SEQUENCE_FILE_ADDED]);
        assert_eq!(db.sequence_files(USER).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_gate_checks_premium_before_template() {
        let db = Database::new().unwrap();
        let chat = FakeChat::default();

        let accepted = accept_file(&chat, &db, "@admin", false, USER, file(1, "a.mkv")).await.unwrap();
        assert_eq!(accepted, None);
        assert_eq!(chat.sent(), vec![commands::premium_required("@admin")]);

        db.set_premium(USER, Utc::now() + chrono::Duration::hours(1)).unwrap();
        let accepted = accept_file(&chat, &db, "@admin", false, USER, file(2, "a.mkv")).await.unwrap();
        assert_eq!(accepted, None);
        assert_eq!(chat.sent().last().unwrap(), commands::NO_FORMAT);

        db.set_setting(USER, Setting::FormatTemplate, Some("Show E{episode}")).unwrap();
        let accepted = accept_file(&chat, &db, "@admin", false, USER, file(3, "a.mkv")).await.unwrap();
        assert_eq!(accepted.as_deref(), Some("Show E{episode}"));
        assert_eq!(chat.sent().len(), 2);
        assert!(db.sequence_files(USER).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_sequence_twice_keeps_stored_files() {
        let db = Database::new().unwrap();
        let chat = FakeChat::default();

        start_sequence(&chat, &db, CHAT, USER).await.unwrap();
        db.add_sequence_file(USER, &file(1, "Show E01.mkv")).unwrap();
        start_sequence(&chat, &db, CHAT, USER).await.unwrap();

        assert_eq!(chat.sent(), vec![SEQUENCE_STARTED, SEQUENCE_RUNNING]);
        assert_eq!(db.sequence_files(USER).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_sequence_without_files() {
        let db = Database::new().unwrap();
        let chat = FakeChat::default();

        end_sequence(&chat, &db, Duration::ZERO, CHAT, USER, "Alice").await.unwrap();
        db.start_sequence(USER).unwrap();
        end_sequence(&chat, &db, Duration::ZERO, CHAT, USER, "Alice").await.unwrap();

        assert_eq!(chat.sent(), vec![SEQUENCE_EMPTY, SEQUENCE_EMPTY]);
        assert!(db.is_in_sequence(USER).unwrap());
        assert!(db.leaderboard(5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_sequence_copies_in_order_then_finishes() {
        let db = Arc::new(Database::new().unwrap());
        let chat = FakeChat {
            database: Some(db.clone()),
            ..Default::default()
        };
        db.start_sequence(USER).unwrap();
        db.add_sequence_file(USER, &file(1, "Show E03.mkv")).unwrap();
        db.add_sequence_file(USER, &file(2, "Show E01.mkv")).unwrap();
        db.add_sequence_file(USER, &file(3, "Show E02.mkv")).unwrap();

        end_sequence(&chat, &db, Duration::ZERO, CHAT, USER, "Alice").await.unwrap();

        // Every copy happened while the sequence was still open.
        assert_eq!(*chat.copies.lock().unwrap(), vec![(2, true), (3, true), (1, true)]);
        assert!(!db.is_in_sequence(USER).unwrap());
        assert!(db.sequence_files(USER).unwrap().is_empty());
        let board = db.leaderboard(5).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].files_sequenced, 3);
        assert_eq!(chat.sent(), vec![SEQUENCE_DONE]);
    }

    #[tokio::test]
    async fn test_recheck_edits_caption_of_photo_prompt() {
        let channels = vec!["a".to_string(), "b".to_string()];
        let chat = FakeChat {
            joined: HashSet::from(["a", "b"]),
            ..Default::default()
        };
        recheck_subscription(&chat, &channels, 1, (CHAT, 5), true).await.unwrap();
        assert_eq!(
            *chat.edits.lock().unwrap(),
            vec![("caption", force_sub::ALL_JOINED.to_string())]
        );
    }

    #[tokio::test]
    async fn test_recheck_edits_text_prompt() {
        let channels = vec!["a".to_string(), "b".to_string()];
        let chat = FakeChat {
            joined: HashSet::from(["a"]),
            ..Default::default()
        };
        recheck_subscription(&chat, &channels, 1, (CHAT, 5), false).await.unwrap();
        assert_eq!(
            *chat.edits.lock().unwrap(),
            vec![("text", force_sub::STILL_MISSING.to_string())]
        );
    }

    #[tokio::test]
    async fn test_recheck_ignores_unchanged_prompt_only() {
        let channels = vec!["a".to_string()];
        let unchanged = FakeChat {
            edit_error: Some(RequestError::Api(ApiError::MessageNotModified)),
            ..Default::default()
        };
        assert!(recheck_subscription(&unchanged, &channels, 1, (CHAT, 5), false).await.is_ok());

        let gone = FakeChat {
            edit_error: Some(RequestError::Api(ApiError::MessageToEditNotFound)),
            ..Default::default()
        };
        let result = recheck_subscription(&gone, &channels, 1, (CHAT, 5), false).await;
        assert!(matches!(result, Err(HandlerError::Request(_))));
    }

    #[test]
    fn test_only_premium_commands_work_in_groups() {
        assert!(works_in_groups(&Command::AddPremium("6h".into())));
        assert!(works_in_groups(&Command::RmPremium(String::new())));
        assert!(works_in_groups(&Command::MyPlan(String::new())));
        assert!(!works_in_groups(&Command::StartSequence));
        assert!(!works_in_groups(&Command::Autorename("x".into())));
    }

    #[test]
    fn test_reply_target_refuses_caller_and_bots() {
        let owner = UserId(1);
        assert_eq!(reply_target(owner, None).0, ReplyTarget::NoReply);

        let own_message = replied(1, false, None);
        assert_eq!(reply_target(owner, Some(&own_message)).0, ReplyTarget::Refused);

        let bot_message = replied(99, true, None);
        assert_eq!(reply_target(owner, Some(&bot_message)).0, ReplyTarget::Refused);

        let user_message = replied(42, false, None);
        let (target, user) = reply_target(owner, Some(&user_message));
        assert_eq!(target, ReplyTarget::User(42));
        assert_eq!(user.unwrap().first_name, "Someone");

        assert_eq!(premium_usage(&ReplyTarget::Refused, premium::ADD_USAGE), BAD_REPLY_TARGET);
        assert_eq!(premium_usage(&ReplyTarget::NoReply, premium::ADD_USAGE), premium::ADD_USAGE);
    }

    #[test]
    fn test_reply_target_uses_forward_origin() {
        let owner = UserId(1);
        let forwarded = replied(
            1,
            false,
            Some(r#"{"type": "user", "date": 1690000000, "sender_user": {"id": 42, "is_bot": false, "first_name": "Carol"}}"#),
        );
        let (target, user) = reply_target(owner, Some(&forwarded));
        assert_eq!(target, ReplyTarget::User(42));
        assert_eq!(user.unwrap().first_name, "Carol");

        let hidden = replied(
            1,
            false,
            Some(r#"{"type": "hidden_user", "date": 1690000000, "sender_user_name": "Ghost"}"#),
        );
        assert_eq!(reply_target(owner, Some(&hidden)).0, ReplyTarget::Refused);

        let from_bot = replied(
            1,
            false,
            Some(r#"{"type": "user", "date": 1690000000, "sender_user": {"id": 99, "is_bot": true, "first_name": "Bot"}}"#),
        );
        assert_eq!(reply_target(owner, Some(&from_bot)).0, ReplyTarget::Refused);
    }

    #[test]
    fn test_display_name() {
        let with_username = KnownUser {
            user_id: 1,
            username: Some("alice".into()),
            first_name: "Alice".into(),
        };
        assert_eq!(display_name(1, Some(&with_username)), "@alice");

        let no_username = KnownUser {
            user_id: 2,
            username: None,
            first_name: "Bob <3".into(),
        };
        assert_eq!(
            display_name(2, Some(&no_username)),
            "<a href=\"tg://user?id=2\">Bob &lt;3</a>"
        );
        assert_eq!(display_name(3, None), "User ID: <code>3</code>");
    }

    #[test]
    fn test_resolve_target() {
        let db = Database::new().unwrap();
        db.touch_user(42, Some("Carol"), "Carol").unwrap();

        let (id, name) = resolve_target(&db, &Target::Username("carol".into())).unwrap().unwrap();
        assert_eq!(id, 42);
        assert_eq!(name, "@Carol");

        assert!(resolve_target(&db, &Target::Username("nobody".into())).unwrap().is_none());

        let (id, name) = resolve_target(&db, &Target::Id(7)).unwrap().unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "User ID: <code>7</code>");
    }

    #[test]
    fn test_target_not_found() {
        assert_eq!(
            target_not_found(&Target::Username("dave".into())),
            "❌ User @dave not found. They need to start the bot first."
        );
    }
}
