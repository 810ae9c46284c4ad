//! Collection commands served by the ticketbox server.
//!
//! Each command is a small handler registered with the [`Dispatcher`] under
//! its console name. Handlers are fast in-memory operations; they run on the
//! server loop thread.

use crate::dispatch::{expect_args, Command, CommandError, Context, Dispatcher, RegistryError};
use crate::model::Ticket;
use crate::protocol::{Request, Response, ResponseStatus};
use crate::storage::{CollectionStore, StorageResult};
use std::collections::BTreeSet;

/// Number of entries shown by `history`.
const HISTORY_LIMIT: usize = 15;

type Ctx<'a> = Context<'a, CollectionStore>;
type CommandResult = Result<Response, CommandError>;

/// Register every collection command.
pub fn register_all(dispatcher: &mut Dispatcher<CollectionStore>) -> Result<(), RegistryError> {
    dispatcher.register("help", Help, "help - list available commands")?;
    dispatcher.register("info", Info, "info - show collection type, init time and size")?;
    dispatcher.register("show", Show, "show - list every ticket")?;
    dispatcher.register("add", Add, "add {element} - add a new ticket")?;
    dispatcher.register(
        "update",
        Update,
        "update id {element} - replace the ticket with the given id",
    )?;
    dispatcher.register(
        "remove_by_id",
        RemoveById,
        "remove_by_id id - remove the ticket with the given id",
    )?;
    dispatcher.register("clear", Clear, "clear - remove every ticket")?;
    dispatcher.register("head", Head, "head - show the first ticket")?;
    dispatcher.register(
        "remove_head",
        RemoveHead,
        "remove_head - show and remove the first ticket",
    )?;
    dispatcher.register("history", History, "history - show the last 15 commands")?;
    dispatcher.register(
        "filter_starts_with_name",
        FilterStartsWithName,
        "filter_starts_with_name name - list tickets whose name starts with the prefix",
    )?;
    dispatcher.register(
        "print_unique_discount",
        PrintUniqueDiscount,
        "print_unique_discount - list distinct discount values",
    )?;
    dispatcher.register(
        "print_field_descending_person",
        PrintFieldDescendingPerson,
        "print_field_descending_person - list persons in descending order",
    )?;
    dispatcher.register(
        "execute_script",
        ExecuteScript,
        "execute_script file_name - run commands from a script file",
    )?;
    dispatcher.register("exit", Exit, "exit - end the client session")?;
    Ok(())
}

fn parse_id(request: &Request) -> Result<i32, CommandError> {
    expect_args(request, 1)?;
    request.args[0]
        .parse()
        .map_err(|_| CommandError::Arguments(format!("'{}' is not a valid id", request.args[0])))
}

fn records<'a>(tickets: impl Iterator<Item = &'a Ticket>) -> Vec<Ticket> {
    tickets.cloned().collect()
}

struct Help;

impl Command<CollectionStore> for Help {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let lines: Vec<&str> = ctx.catalog().map(|(_, help)| help).collect();
        Ok(Response::ok(lines.join("\n")))
    }
}

struct Info;

impl Command<CollectionStore> for Info {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let info = ctx.state.info();
        Ok(Response::ok(format!(
            "type: {}\ninitialized: {}\nitems: {}",
            info.kind,
            info.initialized_at.format("%Y-%m-%d %H:%M:%S"),
            info.len
        )))
    }
}

struct Show;

impl Command<CollectionStore> for Show {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let tickets = records(ctx.state.iter());
        Ok(Response::ok(format!("{} items", tickets.len())).with_records(tickets))
    }
}

struct Add;

impl Command<CollectionStore> for Add {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let Some(ticket) = &request.payload else {
            return Ok(Response::object_required("a ticket is needed to run 'add'"));
        };
        ticket.validate()?;
        match ctx.state.insert(ticket.clone()) {
            StorageResult::Stored(id) => Ok(Response::ok(format!("ticket {id} added"))),
            other => Ok(Response::command_error(format!("ticket not added: {other:?}"))),
        }
    }
}

struct Update;

impl Command<CollectionStore> for Update {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        let id = parse_id(request)?;
        if !ctx.state.contains(id) {
            return Ok(Response::command_error(format!("no ticket with id {id}")));
        }
        let Some(ticket) = &request.payload else {
            return Ok(Response::object_required(format!(
                "a ticket is needed to update {id}"
            )));
        };
        ticket.validate()?;
        match ctx.state.update(id, ticket.clone()) {
            StorageResult::Updated => Ok(Response::ok(format!("ticket {id} updated"))),
            _ => Ok(Response::command_error(format!("no ticket with id {id}"))),
        }
    }
}

struct RemoveById;

impl Command<CollectionStore> for RemoveById {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        let id = parse_id(request)?;
        match ctx.state.remove_by_id(id) {
            StorageResult::Removed => Ok(Response::ok(format!("ticket {id} removed"))),
            _ => Ok(Response::command_error(format!("no ticket with id {id}"))),
        }
    }
}

struct Clear;

impl Command<CollectionStore> for Clear {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        ctx.state.clear();
        Ok(Response::ok("collection cleared"))
    }
}

struct Head;

impl Command<CollectionStore> for Head {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        match ctx.state.head() {
            Some(ticket) => Ok(Response::ok("first ticket").with_records(vec![ticket.clone()])),
            None => Ok(Response::ok("collection is empty")),
        }
    }
}

struct RemoveHead;

impl Command<CollectionStore> for RemoveHead {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        match ctx.state.remove_head() {
            Some(ticket) => Ok(Response::ok("removed first ticket").with_records(vec![ticket])),
            None => Ok(Response::ok("collection is empty")),
        }
    }
}

struct History;

impl Command<CollectionStore> for History {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let history = ctx.history();
        let start = history.len().saturating_sub(HISTORY_LIMIT);
        Ok(Response::ok(history[start..].join("\n")))
    }
}

struct FilterStartsWithName;

impl Command<CollectionStore> for FilterStartsWithName {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 1)?;
        let prefix = &request.args[0];
        let matched = records(ctx.state.iter().filter(|t| t.name.starts_with(prefix.as_str())));
        Ok(Response::ok(format!("{} items match '{prefix}'", matched.len())).with_records(matched))
    }
}

struct PrintUniqueDiscount;

impl Command<CollectionStore> for PrintUniqueDiscount {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let discounts: BTreeSet<i64> = ctx.state.iter().map(|t| t.discount).collect();
        let list: Vec<String> = discounts.iter().map(|d| d.to_string()).collect();
        Ok(Response::ok(list.join(", ")))
    }
}

struct PrintFieldDescendingPerson;

impl Command<CollectionStore> for PrintFieldDescendingPerson {
    fn execute(&self, ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        let mut persons: Vec<_> = ctx.state.iter().map(|t| &t.person).collect();
        persons.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let lines: Vec<String> = persons.iter().map(|p| p.to_string()).collect();
        Ok(Response::ok(lines.join("\n")))
    }
}

struct ExecuteScript;

impl Command<CollectionStore> for ExecuteScript {
    fn execute(&self, _ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 1)?;
        Ok(Response::new(ResponseStatus::ExecuteScript, request.args[0].clone()))
    }
}

struct Exit;

impl Command<CollectionStore> for Exit {
    fn execute(&self, _ctx: &mut Ctx<'_>, request: &Request) -> CommandResult {
        expect_args(request, 0)?;
        Ok(Response::new(ResponseStatus::Exit, "bye"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_ticket;

    fn dispatcher() -> Dispatcher<CollectionStore> {
        let mut d = Dispatcher::new(CollectionStore::new());
        register_all(&mut d).unwrap();
        d
    }

    fn run(d: &mut Dispatcher<CollectionStore>, line: &str) -> Response {
        d.dispatch(&Request::parse_line(line))
    }

    fn add(d: &mut Dispatcher<CollectionStore>, name: &str, price: f64, discount: i64) {
        let mut ticket = sample_ticket(0, name, price);
        ticket.discount = discount;
        let resp = d.dispatch(&Request::new("add", vec![]).with_payload(ticket));
        assert!(resp.is_ok(), "{resp:?}");
    }

    #[test]
    fn test_add_requires_object() {
        let mut d = dispatcher();
        assert_eq!(run(&mut d, "add").status, ResponseStatus::ObjectRequired);
        add(&mut d, "concert", 10.0, 5);
        assert_eq!(d.state().len(), 1);
    }

    #[test]
    fn test_show_returns_records() {
        let mut d = dispatcher();
        add(&mut d, "b", 20.0, 5);
        add(&mut d, "a", 10.0, 5);
        let resp = run(&mut d, "show");
        assert_eq!(resp.message, "2 items");
        let names: Vec<String> = resp.result_set.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_update_flow() {
        let mut d = dispatcher();
        add(&mut d, "old", 10.0, 5);

        assert_eq!(run(&mut d, "update 9").status, ResponseStatus::CommandError);
        assert_eq!(run(&mut d, "update x").status, ResponseStatus::CommandError);
        assert_eq!(run(&mut d, "update 1").status, ResponseStatus::ObjectRequired);

        let req = Request::parse_line("update 1").with_payload(sample_ticket(0, "new", 3.0));
        assert!(d.dispatch(&req).is_ok());
        assert_eq!(d.state().head().unwrap().name, "new");
    }

    #[test]
    fn test_remove_and_head() {
        let mut d = dispatcher();
        add(&mut d, "a", 1.0, 5);
        add(&mut d, "b", 2.0, 5);

        assert!(run(&mut d, "remove_by_id 1").is_ok());
        assert_eq!(run(&mut d, "remove_by_id 1").status, ResponseStatus::CommandError);
        assert_eq!(run(&mut d, "head").result_set.unwrap()[0].name, "b");
        assert_eq!(run(&mut d, "remove_head").result_set.unwrap()[0].name, "b");
        assert_eq!(run(&mut d, "head").message, "collection is empty");
    }

    #[test]
    fn test_filter_and_discounts() {
        let mut d = dispatcher();
        add(&mut d, "concert", 1.0, 30);
        add(&mut d, "cinema", 2.0, 10);
        add(&mut d, "opera", 3.0, 30);

        let resp = run(&mut d, "filter_starts_with_name c");
        assert_eq!(resp.result_set.unwrap().len(), 2);
        assert_eq!(run(&mut d, "print_unique_discount").message, "10, 30");
    }

    #[test]
    fn test_history_limited() {
        let mut d = dispatcher();
        for _ in 0..20 {
            run(&mut d, "info");
        }
        let resp = run(&mut d, "history");
        let lines: Vec<&str> = resp.message.lines().collect();
        assert_eq!(lines.len(), HISTORY_LIMIT);
        assert_eq!(lines.last(), Some(&"history"));
    }

    #[test]
    fn test_script_and_exit_statuses() {
        let mut d = dispatcher();
        let resp = run(&mut d, "execute_script run.txt");
        assert_eq!(resp.status, ResponseStatus::ExecuteScript);
        assert_eq!(resp.message, "run.txt");
        assert_eq!(run(&mut d, "exit").status, ResponseStatus::Exit);
    }

    #[test]
    fn test_help_lists_every_command() {
        let mut d = dispatcher();
        let resp = run(&mut d, "help");
        assert_eq!(resp.message.lines().count(), 15);
        assert_eq!(run(&mut d, "help me").status, ResponseStatus::CommandError);
    }
}
