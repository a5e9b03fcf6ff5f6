mod client;
mod notes_list;
mod sharing;
mod users;
