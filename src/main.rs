mod config;
mod error;
mod tutor;

use std::sync::Arc;

use config::Config;
use dotenv::dotenv;
use error::{IngestError, ParseError, TutorError};
use teloxide::{
    dispatching::{
        dialogue::{serializer::Json, ErasedStorage, InMemStorage, SqliteStorage, Storage},
        UpdateHandler,
    },
    net::Download,
    prelude::*,
    types::{ChatAction, Document, KeyboardButton, KeyboardMarkup, ParseMode},
    utils::{command::BotCommands, html},
};
use tutor::{
    aggregate::TaxonomyWeights,
    ai_helper::TutorHelper,
    archive::Archive,
    ingest::{DocumentKind, IngestOptions},
    llm::ChatGptModel,
    prompts::{PromptCatalog, Technique},
    render,
    session::Session,
    GenerationMode,
};

type TutorDialogue = Dialogue<State, ErasedStorage<State>>;
type TutorStorage = Arc<ErasedStorage<State>>;
type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerResult = Result<(), HandlerError>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveDocument {
        session: Session,
    },
    ReceiveAnswer {
        session: Session,
        cursor: usize,
    },
    Review {
        session: Session,
    },
}

impl State {
    fn session(&self) -> Option<&Session> {
        match self {
            State::Start => None,
            State::ReceiveDocument { session }
            | State::ReceiveAnswer { session, .. }
            | State::Review { session } => Some(session),
        }
    }

    /// Same step of the conversation, carrying an updated session.
    fn with_session(self, session: Session) -> Self {
        match self {
            State::Start | State::ReceiveDocument { .. } => State::ReceiveDocument { session },
            State::ReceiveAnswer { cursor, .. } => State::ReceiveAnswer { session, cursor },
            State::Review { .. } => State::Review { session },
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "Send me a .txt or .pdf file with practice questions. These commands are supported:"
)]
enum Command {
    #[command(description = "start over with a new document")]
    Start,
    #[command(description = "show this text")]
    Help,
    #[command(description = "transform | generate: how questions are built from the document")]
    Mode(String),
    #[command(description = "show the taxonomy questions")]
    Questions,
    #[command(description = "answer the questions, starting with the first unanswered one")]
    Answer,
    #[command(description = "skip the current question")]
    Skip,
    #[command(description = "score your answers")]
    Score,
    #[command(description = "show or set level weights, e.g. /weights 0.3 0.2 0.2 0.1 0.1 0.1")]
    Weights(String),
    #[command(description = "get study recommendations from your scores")]
    Recommend,
    #[command(description = "rewrite one question for every taxonomy level")]
    Transform(String),
    #[command(description = "classify a response on the SOLO taxonomy")]
    Solo(String),
    #[command(description = "ask the tutor anything about your document or your learning")]
    Ask(String),
    #[command(description = "describe a difficulty and get the thought processes behind it")]
    Reflect(String),
    #[command(description = "describe a task and watch a learner work through the taxonomy")]
    Roleplay(String),
    #[command(description = "get Bloom-Turing test questions for a topic")]
    Turing(String),
    #[command(description = "forget the current document and answers")]
    Reset,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting Bloom tutor bot...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if std::env::var("TELOXIDE_TOKEN").is_err() {
        log::error!("Configuration error: environment variable TELOXIDE_TOKEN is not set");
        std::process::exit(1);
    }

    let model = match ChatGptModel::new(&config) {
        Ok(model) => model,
        Err(e) => {
            log::error!("Unable to set up the ChatGPT client: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Using model {}", config.model_name);

    let storage: TutorStorage = match &config.session_db {
        Some(path) => match SqliteStorage::open(path, Json).await {
            Ok(storage) => {
                log::info!("Keeping sessions in {}", path);
                storage.erase()
            }
            Err(e) => {
                log::error!("Unable to open session database {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => InMemStorage::new().erase(),
    };

    let helper = Arc::new(TutorHelper::new(
        Arc::new(model),
        PromptCatalog::with_generation_override(config.generation_prompt.clone()),
        Archive::new(&config.output_dir),
        IngestOptions {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            top_chunks: config.top_chunks,
            max_upload_bytes: config.max_upload_bytes,
        },
    ));

    let bot = Bot::from_env();
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![storage, helper])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<HandlerError> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>().endpoint(handle_command);

    Update::filter_message()
        .enter_dialogue::<Message, ErasedStorage<State>, State>()
        .branch(command_handler)
        .branch(case![State::Start].endpoint(start))
        .branch(case![State::ReceiveDocument { session }].endpoint(receive_document))
        .branch(case![State::ReceiveAnswer { session, cursor }].endpoint(receive_answer))
        .branch(case![State::Review { session }].endpoint(review))
}

const GREETING_TEXT: &str = "Hi! I turn practice questions into Bloom's Taxonomy exercises.\n\
Send me a .txt or .pdf file with your questions (or a topic, after /mode generate) and I will \
write questions for every level, from Remember to Create. Type /help to see everything I can do.";
const SEND_DOCUMENT_TEXT: &str = "Please send a .txt or .pdf document.";
const ALL_ANSWERED_TEXT: &str =
    "That was the last question. Score your answers, or revisit the questions.";
const ANSWER_WITH_TEXT: &str = "Please answer with text, or /skip this question.";
const NO_QUESTIONS_TEXT: &str = "There are no questions yet. Send a document first.";
const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. Type /help to see the list.";
const LLM_FAILURE_TEXT: &str = "The language model did not answer. Please try again later.";

const SCORE_BUTTON: &str = "Score my answers";
const RECOMMEND_BUTTON: &str = "Recommendations";
const QUESTIONS_BUTTON: &str = "Show questions";

fn review_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(SCORE_BUTTON),
            KeyboardButton::new(RECOMMEND_BUTTON),
        ],
        vec![KeyboardButton::new(QUESTIONS_BUTTON)],
    ])
}

async fn start(
    bot: Bot,
    dialogue: TutorDialogue,
    helper: Arc<TutorHelper>,
    msg: Message,
) -> HandlerResult {
    if let Some(document) = msg.document() {
        return load_document(&bot, &dialogue, &helper, Session::default(), &msg, document).await;
    }
    greet(&bot, &dialogue, msg.chat.id).await
}

async fn greet(bot: &Bot, dialogue: &TutorDialogue, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, GREETING_TEXT).await?;
    dialogue
        .update(State::ReceiveDocument {
            session: Session::default(),
        })
        .await?;
    Ok(())
}

async fn receive_document(
    bot: Bot,
    dialogue: TutorDialogue,
    helper: Arc<TutorHelper>,
    session: Session,
    msg: Message,
) -> HandlerResult {
    match msg.document() {
        Some(document) => load_document(&bot, &dialogue, &helper, session, &msg, document).await,
        None => {
            bot.send_message(msg.chat.id, SEND_DOCUMENT_TEXT).await?;
            Ok(())
        }
    }
}

async fn receive_answer(
    bot: Bot,
    dialogue: TutorDialogue,
    (mut session, cursor): (Session, usize),
    msg: Message,
) -> HandlerResult {
    let text = match msg.text() {
        Some(text) if text.starts_with('/') => {
            bot.send_message(msg.chat.id, UNKNOWN_COMMAND_TEXT).await?;
            return Ok(());
        }
        Some(text) if !text.trim().is_empty() => text,
        _ => {
            bot.send_message(msg.chat.id, ANSWER_WITH_TEXT).await?;
            return Ok(());
        }
    };

    if let Some(key) = session.answer_slots().get(cursor).copied() {
        session.record_answer(key, text);
        log::debug!("Chat {} answered {:?}", msg.chat.id, key);
    }
    ask(&bot, &dialogue, msg.chat.id, session, cursor + 1).await
}

async fn review(
    bot: Bot,
    dialogue: TutorDialogue,
    helper: Arc<TutorHelper>,
    mut session: Session,
    msg: Message,
) -> HandlerResult {
    if let Some(document) = msg.document() {
        return load_document(&bot, &dialogue, &helper, session, &msg, document).await;
    }
    let chat_id = msg.chat.id;
    match msg.text() {
        Some(SCORE_BUTTON) => score(&bot, &dialogue, &helper, chat_id, session).await,
        Some(RECOMMEND_BUTTON) => recommend(&bot, &helper, chat_id, &session).await,
        Some(QUESTIONS_BUTTON) => {
            show_questions(&bot, &dialogue, &helper, chat_id, session, true).await
        }
        Some(text) if !text.starts_with('/') && !text.trim().is_empty() => {
            tutor_chat(&bot, &helper, chat_id, &mut session, text).await?;
            dialogue.update(State::Review { session }).await?;
            Ok(())
        }
        _ => {
            bot.send_message(
                chat_id,
                "Please choose one of the options, ask me a question, or send a new document.",
            )
                .reply_markup(review_keyboard())
                .await?;
            Ok(())
        }
    }
}

async fn handle_command(
    bot: Bot,
    dialogue: TutorDialogue,
    helper: Arc<TutorHelper>,
    state: State,
    msg: Message,
    cmd: Command,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let mut session = state.session().cloned().unwrap_or_default();

    match cmd {
        Command::Start | Command::Reset => greet(&bot, &dialogue, chat_id).await?,
        Command::Help => {
            bot.send_message(chat_id, Command::descriptions().to_string())
                .await?;
        }
        Command::Mode(name) => match GenerationMode::from_name(&name) {
            Some(mode) => {
                session.mode = mode;
                bot.send_message(
                    chat_id,
                    format!("Mode set to {}. It applies to the next document you send.", mode.name()),
                )
                .await?;
                dialogue.update(state.with_session(session)).await?;
            }
            None => {
                bot.send_message(
                    chat_id,
                    format!(
                        "Current mode: {}. Use /mode transform or /mode generate.",
                        session.mode.name()
                    ),
                )
                .await?;
            }
        },
        Command::Questions => {
            let in_review = matches!(state, State::Review { .. });
            show_questions(&bot, &dialogue, &helper, chat_id, session, in_review).await?
        }
        Command::Answer => {
            if session.taxonomy.is_none() {
                report(&bot, chat_id, &TutorError::MissingStep(NO_QUESTIONS_TEXT)).await?;
            } else {
                let cursor = session.first_unanswered().unwrap_or(0);
                ask(&bot, &dialogue, chat_id, session, cursor).await?;
            }
        }
        Command::Skip => match state {
            State::ReceiveAnswer { cursor, .. } => {
                ask(&bot, &dialogue, chat_id, session, cursor + 1).await?
            }
            _ => {
                bot.send_message(chat_id, "There is no question to skip. Use /answer to start.")
                    .await?;
            }
        },
        Command::Score => score(&bot, &dialogue, &helper, chat_id, session).await?,
        Command::Weights(input) => {
            if input.trim().is_empty() {
                send_html(&bot, chat_id, &render::weights(&session.weights)).await?;
                return Ok(());
            }
            let raw = match TaxonomyWeights::parse(&input) {
                Ok(raw) => raw,
                Err(e) => {
                    bot.send_message(
                        chat_id,
                        format!(
                            "Could not read the weights: {}. Give six numbers in level order \
                             (Remember to Create) or pairs such as remember=0.4 apply=0.6.",
                            e
                        ),
                    )
                    .await?;
                    return Ok(());
                }
            };
            let (weights, adjustment) = TaxonomyWeights::normalize(raw);
            session.set_weights(weights);

            let mut text = String::new();
            if let Some(note) = render::weight_adjustment(adjustment) {
                text.push_str(&note);
                text.push_str("\n\n");
            }
            text.push_str(&render::weights(&session.weights));
            if let Some(evaluation) = &session.evaluation {
                text.push_str("\n\n");
                text.push_str(&render::evaluation(evaluation, session.scored.as_ref()));
            }
            send_html(&bot, chat_id, &text).await?;
            dialogue.update(state.with_session(session)).await?;
        }
        Command::Recommend => recommend(&bot, &helper, chat_id, &session).await?,
        Command::Transform(question) => {
            typing(&bot, chat_id).await;
            match helper.transform_question(&question).await {
                Ok(text) => send_html(&bot, chat_id, &html::escape(&text)).await?,
                Err(e) => report(&bot, chat_id, &e).await?,
            }
        }
        Command::Solo(response) => {
            typing(&bot, chat_id).await;
            match helper.classify_solo(&response).await {
                Ok(level) => send_html(&bot, chat_id, &render::solo(level)).await?,
                Err(e) => report(&bot, chat_id, &e).await?,
            }
        }
        Command::Ask(question) => {
            tutor_chat(&bot, &helper, chat_id, &mut session, &question).await?;
            dialogue.update(state.with_session(session)).await?;
        }
        Command::Reflect(text) => {
            coach(&bot, &helper, chat_id, Technique::TheoryOfMind, &text).await?
        }
        Command::Roleplay(text) => {
            coach(&bot, &helper, chat_id, Technique::RolePlay, &text).await?
        }
        Command::Turing(topic) => {
            coach(&bot, &helper, chat_id, Technique::BloomTuring, &topic).await?
        }
    }
    Ok(())
}

/// The exchange is remembered in `session`; the caller stores it.
async fn tutor_chat(
    bot: &Bot,
    helper: &TutorHelper,
    chat_id: ChatId,
    session: &mut Session,
    question: &str,
) -> HandlerResult {
    typing(bot, chat_id).await;
    match helper.ask_tutor(session, question).await {
        Ok(reply) => send_html(bot, chat_id, &html::escape(&reply)).await,
        Err(e) => report(bot, chat_id, &e).await,
    }
}

async fn coach(
    bot: &Bot,
    helper: &TutorHelper,
    chat_id: ChatId,
    technique: Technique,
    input: &str,
) -> HandlerResult {
    typing(bot, chat_id).await;
    match helper.coach(technique, input).await {
        Ok(reply) => send_html(bot, chat_id, &html::escape(&reply)).await,
        Err(e) => report(bot, chat_id, &e).await,
    }
}

async fn load_document(
    bot: &Bot,
    dialogue: &TutorDialogue,
    helper: &TutorHelper,
    mut session: Session,
    msg: &Message,
    document: &Document,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let mime_type = document.mime_type.as_ref().map(|mime| mime.essence_str());
    let Some(kind) = DocumentKind::detect(mime_type, document.file_name.as_deref()) else {
        report(bot, chat_id, &IngestError::UnsupportedType.into()).await?;
        return Ok(());
    };
    if let Err(e) = helper.ingest_options().check_size(u64::from(document.file.size)) {
        report(bot, chat_id, &e.into()).await?;
        return Ok(());
    }

    log::info!(
        "Chat {} sent {:?} ({} bytes)",
        chat_id,
        document.file_name,
        document.file.size
    );
    let file = bot.get_file(&document.file.id).await?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes).await?;

    if let Err(e) = helper
        .ingest_document(&mut session, document.file_name.clone(), kind, bytes)
        .await
    {
        report(bot, chat_id, &e).await?;
        return Ok(());
    }

    bot.send_message(
        chat_id,
        format!(
            "Document received. Building questions in {} mode...",
            session.mode.name()
        ),
    )
    .await?;
    build_and_ask(bot, dialogue, helper, chat_id, session).await
}

/// Asks the model for the taxonomy, then starts the answering round. On
/// failure the document stays loaded so /questions can try again.
async fn build_and_ask(
    bot: &Bot,
    dialogue: &TutorDialogue,
    helper: &TutorHelper,
    chat_id: ChatId,
    mut session: Session,
) -> HandlerResult {
    typing(bot, chat_id).await;
    if let Err(e) = helper.build_taxonomy(&mut session).await {
        report(bot, chat_id, &e).await?;
        dialogue.update(State::ReceiveDocument { session }).await?;
        return Ok(());
    }
    if let Some(taxonomy) = &session.taxonomy {
        send_html(bot, chat_id, &render::taxonomy(taxonomy, &session.answers)).await?;
    }
    ask(bot, dialogue, chat_id, session, 0).await
}

async fn show_questions(
    bot: &Bot,
    dialogue: &TutorDialogue,
    helper: &TutorHelper,
    chat_id: ChatId,
    session: Session,
    in_review: bool,
) -> HandlerResult {
    if let Some(taxonomy) = &session.taxonomy {
        send_html(bot, chat_id, &render::taxonomy(taxonomy, &session.answers)).await?;
        if in_review {
            bot.send_message(chat_id, "Use /answer to change your answers.")
                .reply_markup(review_keyboard())
                .await?;
        }
        return Ok(());
    }
    if session.file_content.is_some() {
        return build_and_ask(bot, dialogue, helper, chat_id, session).await;
    }
    report(bot, chat_id, &TutorError::MissingStep(NO_QUESTIONS_TEXT)).await
}

/// Sends the question at `cursor`, or moves on to review once every question was asked.
async fn ask(
    bot: &Bot,
    dialogue: &TutorDialogue,
    chat_id: ChatId,
    session: Session,
    cursor: usize,
) -> HandlerResult {
    let slots = session.answer_slots();
    let next = slots.get(cursor).and_then(|key| {
        let question = session.taxonomy.as_ref()?.question(*key)?;
        Some(render::question(*key, question, cursor, slots.len()))
    });

    match next {
        Some(text) => {
            send_html(bot, chat_id, &text).await?;
            dialogue.update(State::ReceiveAnswer { session, cursor }).await?;
        }
        None => {
            bot.send_message(chat_id, ALL_ANSWERED_TEXT)
                .reply_markup(review_keyboard())
                .await?;
            dialogue.update(State::Review { session }).await?;
        }
    }
    Ok(())
}

async fn score(
    bot: &Bot,
    dialogue: &TutorDialogue,
    helper: &TutorHelper,
    chat_id: ChatId,
    mut session: Session,
) -> HandlerResult {
    typing(bot, chat_id).await;
    if let Err(e) = helper.score_answers(&mut session).await {
        return report(bot, chat_id, &e).await;
    }
    if let Some(evaluation) = &session.evaluation {
        send_html(
            bot,
            chat_id,
            &render::evaluation(evaluation, session.scored.as_ref()),
        )
        .await?;
    }
    bot.send_message(chat_id, "Ask for recommendations, or adjust the level weights with /weights.")
        .reply_markup(review_keyboard())
        .await?;
    dialogue.update(State::Review { session }).await?;
    Ok(())
}

async fn recommend(
    bot: &Bot,
    helper: &TutorHelper,
    chat_id: ChatId,
    session: &Session,
) -> HandlerResult {
    typing(bot, chat_id).await;
    match helper.recommend(session).await {
        Ok(text) => send_html(bot, chat_id, &html::escape(&text)).await,
        Err(e) => report(bot, chat_id, &e).await,
    }
}

async fn report(bot: &Bot, chat_id: ChatId, err: &TutorError) -> HandlerResult {
    let text = match err {
        TutorError::Ingest(e) => {
            log::info!("Chat {}: rejected document: {}", chat_id, e);
            format!("I could not use this document: {}", html::escape(&e.to_string()))
        }
        TutorError::Llm(e) => {
            log::error!("Chat {}: {}", chat_id, e);
            LLM_FAILURE_TEXT.to_string()
        }
        TutorError::Parse(ParseError::Decode { raw, source }) => {
            log::warn!("Chat {}: undecodable reply: {}", chat_id, source);
            format!(
                "The model's reply was not valid JSON, so nothing was changed. This is what it said:\n{}",
                render::raw_reply(raw)
            )
        }
        TutorError::Parse(ParseError::UnexpectedStructure(detail)) => {
            log::warn!("Chat {}: unexpected reply structure: {}", chat_id, detail);
            format!(
                "The model's reply did not have the expected structure ({}). Please try again.",
                html::escape(detail)
            )
        }
        TutorError::MissingStep(hint) => html::escape(hint),
    };
    send_html(bot, chat_id, &text).await
}

async fn send_html(bot: &Bot, chat_id: ChatId, text: &str) -> HandlerResult {
    for part in render::split_message(text, render::MESSAGE_LIMIT) {
        bot.send_message(chat_id, part)
            .parse_mode(ParseMode::Html)
            .await?;
    }
    Ok(())
}

async fn typing(bot: &Bot, chat_id: ChatId) {
    // Only cosmetic, so a failure here is ignored
    let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
}
