//! Adapters for the external engines: the OpenAI-style chat endpoint,
//! the yt-dlp media downloader, the whisper CLI transcriber, and the
//! ffmpeg audio slicer.

pub mod ffmpeg;
pub mod openai;
pub mod whisper_cli;
pub mod ytdlp;
