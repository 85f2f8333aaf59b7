use rand::seq::SliceRandom;

pub const DEFAULT_WORD_COUNT: usize = 3;

/// Fixed dictionary the session names are drawn from. Short, memorable and
/// easy to type on the receiving side.
const ANIMALS: [&str; 95] = [
    "aardvark",
    "aardwolf",
    "anteater",
    "antelope",
    "ape",
    "armadillo",
    "badger",
    "bat",
    "bear",
    "beaver",
    "bison",
    "bluejay",
    "bobcat",
    "buffalo",
    "cardinal",
    "caribou",
    "cat",
    "cheetah",
    "chicken",
    "chimpanzee",
    "chipmunk",
    "cougar",
    "cow",
    "crow",
    "deer",
    "dingo",
    "dog",
    "duck",
    "eagle",
    "elephant",
    "falcon",
    "ferret",
    "fox",
    "gazelle",
    "giraffe",
    "goat",
    "goose",
    "gorilla",
    "hawk",
    "hedgehog",
    "horse",
    "hummingbird",
    "hyena",
    "ibex",
    "jaguar",
    "jay",
    "kangaroo",
    "koala",
    "lemur",
    "leopard",
    "lion",
    "lynx",
    "magpie",
    "meerkat",
    "mink",
    "mongoose",
    "monkey",
    "moose",
    "muskox",
    "opossum",
    "orangutan",
    "ostrich",
    "otter",
    "owl",
    "panda",
    "pangolin",
    "panther",
    "parrot",
    "peacock",
    "penguin",
    "pig",
    "platypus",
    "porcupine",
    "rabbit",
    "raccoon",
    "raven",
    "reindeer",
    "robin",
    "sheep",
    "skunk",
    "sloth",
    "sparrow",
    "squirrel",
    "stoat",
    "swan",
    "tiger",
    "turkey",
    "wallaby",
    "weasel",
    "wolf",
    "wolverine",
    "wombat",
    "woodpecker",
    "yak",
    "zebra",
];

/// Draw `words` distinct dictionary words and hyphen-join them.
pub fn generate(words: usize) -> String {
    let mut rng = rand::thread_rng();
    ANIMALS
        .choose_multiple(&mut rng, words)
        .copied()
        .collect::<Vec<_>>()
        .join("-")
}
